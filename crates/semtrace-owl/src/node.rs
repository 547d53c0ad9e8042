//! OWL/RDF-XML building blocks.
//!
//! A document is a tree of [`OwlNode`]s. Names are prefixed (`rdf:type`),
//! attribute values may point into a DTD entity (`"&log;cup1"`), and the
//! rendering is fixed: tab indentation, attributes in insertion order with
//! every attribute after the first on its own line, self-closing tags for
//! nodes without value or children.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Indentation added per nesting level.
pub const INDENT_STEP: &str = "\t";

/// Escape text for use inside an XML attribute or element body.
pub fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// PrefixName
// ---------------------------------------------------------------------------

/// A possibly prefixed XML name, e.g. `rdf:type`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrefixName {
    pub prefix: String,
    pub local: String,
}

impl PrefixName {
    pub fn new(prefix: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            local: local.into(),
        }
    }

    /// A name without a local part, rendered as the bare prefix (`xmlns`).
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, "")
    }

    pub fn is_empty(&self) -> bool {
        self.prefix.is_empty() && self.local.is_empty()
    }

    pub fn render(&self) -> String {
        if self.local.is_empty() {
            self.prefix.clone()
        } else if self.prefix.is_empty() {
            self.local.clone()
        } else {
            format!("{}:{}", self.prefix, self.local)
        }
    }
}

// ---------------------------------------------------------------------------
// AttributeValue
// ---------------------------------------------------------------------------

/// An attribute value, optionally relative to a DTD entity: `"&ns;local"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeValue {
    pub entity: String,
    pub value: String,
}

impl AttributeValue {
    pub fn new(entity: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            value: value.into(),
        }
    }

    pub fn plain(value: impl Into<String>) -> Self {
        Self::new("", value)
    }

    /// Quoted rendering, entity reference included.
    pub fn render(&self) -> String {
        if self.entity.is_empty() {
            format!("\"{}\"", escape_xml(&self.value))
        } else {
            format!("\"&{};{}\"", self.entity, escape_xml(&self.value))
        }
    }
}

// ---------------------------------------------------------------------------
// Attribute
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    pub key: PrefixName,
    pub value: AttributeValue,
}

impl Attribute {
    pub fn new(key: PrefixName, value: AttributeValue) -> Self {
        Self { key, value }
    }

    pub fn render(&self) -> String {
        format!("{}={}", self.key.render(), self.value.render())
    }
}

// ---------------------------------------------------------------------------
// OwlNode
// ---------------------------------------------------------------------------

/// One element of the document tree.
///
/// A node holds either a text value or children, never both; when both are
/// set the value wins. A node with an empty name renders only its comment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwlNode {
    pub name: PrefixName,
    pub value: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<OwlNode>,
    pub comment: String,
}

impl OwlNode {
    pub fn new(name: PrefixName) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    /// A nameless node that only renders a comment.
    pub fn comment_only(comment: impl Into<String>) -> Self {
        Self {
            comment: comment.into(),
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, key: PrefixName, value: AttributeValue) -> Self {
        self.attributes.push(Attribute::new(key, value));
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_child(mut self, child: OwlNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = OwlNode>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn add_child(&mut self, child: OwlNode) {
        self.children.push(child);
    }

    /// `<rdf:type rdf:resource="&ns;value"/>`
    pub fn resource_type(entity: &str, class: &str) -> Self {
        Self::new(PrefixName::new("rdf", "type"))
            .with_attribute(PrefixName::new("rdf", "resource"), AttributeValue::new(entity, class))
    }

    /// `<prefix:local rdf:resource="&entity;value"/>`
    pub fn resource_property(property: PrefixName, entity: &str, value: &str) -> Self {
        Self::new(property)
            .with_attribute(PrefixName::new("rdf", "resource"), AttributeValue::new(entity, value))
    }

    /// Value of the first attribute with key `key`, unquoted.
    pub fn attribute(&self, key: &PrefixName) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|attribute| &attribute.key == key)
            .map(|attribute| &attribute.value)
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
            && self.value.is_empty()
            && self.attributes.is_empty()
            && self.children.is_empty()
            && self.comment.is_empty()
    }

    /// Render this node at the given indentation.
    pub fn render(&self, indent: &str) -> String {
        let mut out = String::new();
        self.render_into(&mut out, indent);
        out
    }

    pub(crate) fn render_into(&self, out: &mut String, indent: &str) {
        if !self.comment.is_empty() {
            let _ = write!(out, "\n{indent}<!-- {} -->\n", self.comment);
        }
        if self.name.is_empty() {
            return;
        }
        let name = self.write_start(out, indent);

        if !self.value.is_empty() {
            let _ = writeln!(out, ">{}</{name}>", escape_xml(&self.value));
        } else if self.children.is_empty() {
            out.push_str("/>\n");
        } else {
            out.push_str(">\n");
            let child_indent = format!("{indent}{INDENT_STEP}");
            for child in &self.children {
                child.render_into(out, &child_indent);
            }
            let _ = writeln!(out, "{indent}</{name}>");
        }
    }

    /// Write `<name attr...` without closing the tag; returns the name.
    pub(crate) fn write_start(&self, out: &mut String, indent: &str) -> String {
        let name = self.name.render();
        let _ = write!(out, "{indent}<{name}");
        let last = self.attributes.len().saturating_sub(1);
        for (i, attribute) in self.attributes.iter().enumerate() {
            let _ = write!(out, " {}", attribute.render());
            if i < last {
                let _ = write!(out, "\n{indent}{INDENT_STEP}");
            }
        }
        name
    }
}

// ---------------------------------------------------------------------------
// EntityDtd
// ---------------------------------------------------------------------------

/// The `<!DOCTYPE rdf:RDF[...]>` preamble declaring entity shorthands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDtd {
    pub entities: Vec<(String, String)>,
}

impl EntityDtd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, name: impl Into<String>, uri: impl Into<String>) -> Self {
        self.entities.push((name.into(), uri.into()));
        self
    }

    pub fn uri(&self, name: &str) -> Option<&str> {
        self.entities
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, uri)| uri.as_str())
    }

    pub fn render(&self) -> String {
        let mut out = String::from("<!DOCTYPE rdf:RDF[\n");
        for (name, uri) in &self.entities {
            let _ = writeln!(out, "{INDENT_STEP}<!ENTITY {name} \"{uri}\">");
        }
        out.push_str("]>\n\n");
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn rdf(local: &str) -> PrefixName {
        PrefixName::new("rdf", local)
    }

    // -- 1. Names and attributes --------------------------------------------

    #[test]
    fn prefix_name_rendering() {
        assert_eq!(rdf("type").render(), "rdf:type");
        assert_eq!(PrefixName::bare("xmlns").render(), "xmlns");
        assert!(PrefixName::default().is_empty());
    }

    #[test]
    fn attribute_value_rendering() {
        assert_eq!(AttributeValue::new("log", "cup1").render(), "\"&log;cup1\"");
        assert_eq!(AttributeValue::plain("a<b").render(), "\"a&lt;b\"");
        assert_eq!(
            Attribute::new(rdf("about"), AttributeValue::new("knowrob", "Cup")).render(),
            "rdf:about=\"&knowrob;Cup\""
        );
    }

    // -- 2. Nodes -----------------------------------------------------------

    #[test]
    fn childless_node_self_closes() {
        let node = OwlNode::resource_type("knowrob", "Cup");
        assert_eq!(node.render(""), "<rdf:type rdf:resource=\"&knowrob;Cup\"/>\n");
    }

    #[test]
    fn value_node_renders_inline() {
        let node = OwlNode::new(PrefixName::new("knowrob", "taskSuccess"))
            .with_attribute(rdf("datatype"), AttributeValue::new("xsd", "boolean"))
            .with_value("true");
        assert_eq!(
            node.render("\t"),
            "\t<knowrob:taskSuccess rdf:datatype=\"&xsd;boolean\">true</knowrob:taskSuccess>\n"
        );
    }

    #[test]
    fn multiple_attributes_wrap_and_children_indent() {
        let node = OwlNode::new(rdf("RDF"))
            .with_attribute(PrefixName::bare("xmlns"), AttributeValue::plain("http://a#"))
            .with_attribute(PrefixName::new("xml", "base"), AttributeValue::plain("http://a"))
            .with_child(OwlNode::resource_type("knowrob", "Cup"));
        let expected = "<rdf:RDF xmlns=\"http://a#\"\n\t xml:base=\"http://a\">\n\
                        \t<rdf:type rdf:resource=\"&knowrob;Cup\"/>\n\
                        </rdf:RDF>\n";
        assert_eq!(node.render(""), expected);
    }

    #[test]
    fn comments_precede_and_comment_only_nodes() {
        let node = OwlNode::resource_type("knowrob", "Cup").with_comment("Objects");
        assert_eq!(
            node.render("\t"),
            "\n\t<!-- Objects -->\n\t<rdf:type rdf:resource=\"&knowrob;Cup\"/>\n"
        );
        assert_eq!(OwlNode::comment_only("Note").render(""), "\n<!-- Note -->\n");
        assert_eq!(OwlNode::default().render(""), "");
    }

    #[test]
    fn attribute_lookup() {
        let node = OwlNode::resource_property(PrefixName::new("knowrob", "inContact"), "log", "obj1");
        assert_eq!(
            node.attribute(&rdf("resource")),
            Some(&AttributeValue::new("log", "obj1"))
        );
        assert_eq!(node.attribute(&rdf("about")), None);
    }

    // -- 3. DTD -------------------------------------------------------------

    #[test]
    fn dtd_lists_entities_in_order() {
        let dtd = EntityDtd::new()
            .with_entity("owl", "http://www.w3.org/2002/07/owl#")
            .with_entity("log", "http://knowrob.org/kb/ameva_log.owl#");
        assert_eq!(
            dtd.render(),
            "<!DOCTYPE rdf:RDF[\n\
             \t<!ENTITY owl \"http://www.w3.org/2002/07/owl#\">\n\
             \t<!ENTITY log \"http://knowrob.org/kb/ameva_log.owl#\">\n\
             ]>\n\n"
        );
        assert_eq!(dtd.uri("log"), Some("http://knowrob.org/kb/ameva_log.owl#"));
    }
}
