//! A complete RDF/XML document: declaration, entity DTD, `rdf:RDF` root with
//! namespaces, ontology header, definitions, and individuals.

use serde::{Deserialize, Serialize};

use crate::node::{Attribute, AttributeValue, EntityDtd, OwlNode, PrefixName, INDENT_STEP};

/// XML declaration that opens every document.
pub const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\n";

/// Generic OWL document.
///
/// Definitions are grouped by kind and emitted in a fixed order: ontology
/// header, object properties, datatype properties, classes, individuals. The
/// first node of each definition group carries the group comment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwlDocument {
    pub entities: EntityDtd,
    pub namespaces: Vec<Attribute>,
    pub ontology: Option<OwlNode>,
    pub property_definitions: Vec<OwlNode>,
    pub datatype_definitions: Vec<OwlNode>,
    pub class_definitions: Vec<OwlNode>,
    pub individuals: Vec<OwlNode>,
}

impl OwlDocument {
    pub fn new(entities: EntityDtd) -> Self {
        Self {
            entities,
            ..Self::default()
        }
    }

    pub fn with_namespace(mut self, key: PrefixName, uri: impl Into<String>) -> Self {
        self.namespaces
            .push(Attribute::new(key, AttributeValue::plain(uri)));
        self
    }

    /// Set the `owl:Ontology` header, importing each of `imports`.
    pub fn set_ontology(&mut self, about: &str, imports: &[&str]) {
        let mut ontology = OwlNode::new(PrefixName::new("owl", "Ontology"))
            .with_attribute(PrefixName::new("rdf", "about"), AttributeValue::plain(about))
            .with_comment("Ontologies:");
        for import in imports {
            ontology.add_child(
                OwlNode::new(PrefixName::new("owl", "imports")).with_attribute(
                    PrefixName::new("rdf", "resource"),
                    AttributeValue::plain(*import),
                ),
            );
        }
        self.ontology = Some(ontology);
    }

    /// `<owl:ObjectProperty rdf:about="&entity;name"/>`
    pub fn add_property_definition(&mut self, entity: &str, name: &str) {
        push_definition(
            &mut self.property_definitions,
            "ObjectProperty",
            "Property Definitions",
            entity,
            name,
        );
    }

    /// `<owl:DatatypeProperty rdf:about="&entity;name"/>`
    pub fn add_datatype_definition(&mut self, entity: &str, name: &str) {
        push_definition(
            &mut self.datatype_definitions,
            "DatatypeProperty",
            "Datatype Definitions",
            entity,
            name,
        );
    }

    /// `<owl:Class rdf:about="&entity;name"/>`
    pub fn add_class_definition(&mut self, entity: &str, name: &str) {
        push_definition(
            &mut self.class_definitions,
            "Class",
            "Class Definitions",
            entity,
            name,
        );
    }

    pub fn add_individual(&mut self, individual: OwlNode) {
        self.individuals.push(individual);
    }

    /// Render the document with its own individuals.
    pub fn to_xml(&self) -> String {
        self.render_with_individuals(&self.individuals)
    }

    /// Render the document's header and definitions followed by
    /// `individuals` in place of the stored ones.
    pub fn render_with_individuals(&self, individuals: &[OwlNode]) -> String {
        let mut out = String::from(XML_DECLARATION);
        out.push_str(&self.entities.render());

        // The root is written by hand so the children are streamed instead
        // of cloned into a tree.
        let mut root = OwlNode::new(PrefixName::new("rdf", "RDF"));
        root.attributes = self.namespaces.clone();
        let name = root.write_start(&mut out, "");
        out.push_str(">\n");

        let indent = INDENT_STEP;
        let groups = self
            .ontology
            .iter()
            .chain(&self.property_definitions)
            .chain(&self.datatype_definitions)
            .chain(&self.class_definitions)
            .chain(individuals);
        for node in groups {
            node.render_into(&mut out, indent);
        }
        out.push_str(&format!("</{name}>\n"));
        out
    }
}

fn push_definition(
    group: &mut Vec<OwlNode>,
    kind: &str,
    comment: &str,
    entity: &str,
    name: &str,
) {
    let mut node = OwlNode::new(PrefixName::new("owl", kind))
        .with_attribute(PrefixName::new("rdf", "about"), AttributeValue::new(entity, name));
    if group.is_empty() {
        node.comment = comment.to_owned();
    }
    group.push(node);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn small_document() -> OwlDocument {
        let mut document = OwlDocument::new(
            EntityDtd::new().with_entity("knowrob", "http://knowrob.org/kb/knowrob.owl#"),
        )
        .with_namespace(PrefixName::bare("xmlns"), "http://a#")
        .with_namespace(PrefixName::new("xmlns", "knowrob"), "http://knowrob.org/kb/knowrob.owl#");
        document.set_ontology("http://knowrob.org/kb/a.owl", &["package://knowrob/owl/knowrob.owl"]);
        document
    }

    #[test]
    fn renders_declaration_dtd_and_root() {
        let xml = small_document().to_xml();
        let expected = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\n\
                        <!DOCTYPE rdf:RDF[\n\
                        \t<!ENTITY knowrob \"http://knowrob.org/kb/knowrob.owl#\">\n\
                        ]>\n\n\
                        <rdf:RDF xmlns=\"http://a#\"\n\
                        \t xmlns:knowrob=\"http://knowrob.org/kb/knowrob.owl#\">\n\
                        \n\t<!-- Ontologies: -->\n\
                        \t<owl:Ontology rdf:about=\"http://knowrob.org/kb/a.owl\">\n\
                        \t\t<owl:imports rdf:resource=\"package://knowrob/owl/knowrob.owl\"/>\n\
                        \t</owl:Ontology>\n\
                        </rdf:RDF>\n";
        assert_eq!(xml, expected);
    }

    #[test]
    fn group_comment_only_on_first_definition() {
        let mut document = small_document();
        document.add_class_definition("knowrob", "Cup");
        document.add_class_definition("knowrob", "Table");
        document.add_property_definition("knowrob", "inContact");
        assert_eq!(document.class_definitions[0].comment, "Class Definitions");
        assert!(document.class_definitions[1].comment.is_empty());

        let xml = document.to_xml();
        let property = xml.find("<owl:ObjectProperty rdf:about=\"&knowrob;inContact\"/>").unwrap();
        let class = xml.find("<owl:Class rdf:about=\"&knowrob;Cup\"/>").unwrap();
        assert!(property < class, "properties come before classes");
        assert_eq!(xml.matches("<!-- Class Definitions -->").count(), 1);
    }

    #[test]
    fn substituted_individuals_replace_stored_ones() {
        let mut document = small_document();
        document.add_individual(OwlNode::resource_type("knowrob", "Stored"));
        let replacement = [OwlNode::resource_type("knowrob", "Replacement")];
        let xml = document.render_with_individuals(&replacement);
        assert!(xml.contains("Replacement"));
        assert!(!xml.contains("Stored"));
        assert!(document.to_xml().contains("Stored"));
    }
}
