//! Persisted key-value tags.
//!
//! Owners carry zero or more opaque string tags shaped like
//! `Type;Key1,Value1;Key2,Value2;`. Individuals persist their identity under
//! the [`TAG_TYPE`] tag (bones under [`bone_tag_type`]) so that a later load
//! can import it again.
//!
//! The free functions operate on a plain tag list; [`TagStore`] lifts them to
//! an owner-addressed store, which is all the lifecycle manager depends on.

use std::fmt;

use crate::host::OwnerId;

/// Tag type under which individuals persist their values.
pub const TAG_TYPE: &str = "SemLog";

pub const ID_KEY: &str = "Id";
pub const CLASS_KEY: &str = "Class";
pub const VISUAL_MASK_KEY: &str = "VisualMask";
pub const CALIBRATED_VISUAL_MASK_KEY: &str = "CalibratedVisualMask";

/// Tag type used by the bone with `bone_index`. Bone tags live on the owner
/// of the skeleton, next to the skeleton's own [`TAG_TYPE`] tag.
pub fn bone_tag_type(bone_index: usize) -> String {
    format!("{TAG_TYPE}Bone{bone_index}")
}

// ---------------------------------------------------------------------------
// TagRecord
// ---------------------------------------------------------------------------

/// A parsed tag: its type and ordered key/value pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub tag_type: String,
    pub pairs: Vec<(String, String)>,
}

impl TagRecord {
    /// Create an empty record of the given type.
    pub fn new(tag_type: impl Into<String>) -> Self {
        Self {
            tag_type: tag_type.into(),
            pairs: Vec::new(),
        }
    }

    /// Parse a raw tag. Segments without a `,` separator are skipped; the
    /// value is everything after the first comma.
    ///
    /// Returns `None` for a tag with an empty type segment.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut segments = raw.split(';');
        let tag_type = segments.next()?.trim();
        if tag_type.is_empty() {
            return None;
        }
        let pairs = segments
            .filter_map(|segment| segment.split_once(','))
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some(Self {
            tag_type: tag_type.to_owned(),
            pairs,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set `key` to `value`. Existing keys are only replaced when `overwrite`
    /// is set. Returns `true` if the stored value changed.
    pub fn set(&mut self, key: &str, value: &str, overwrite: bool) -> bool {
        match self.pairs.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => {
                if !overwrite || existing == value {
                    return false;
                }
                *existing = value.to_owned();
                true
            }
            None => {
                self.pairs.push((key.to_owned(), value.to_owned()));
                true
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.pairs.len();
        self.pairs.retain(|(k, _)| k != key);
        self.pairs.len() != before
    }
}

impl fmt::Display for TagRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};", self.tag_type)?;
        for (k, v) in &self.pairs {
            write!(f, "{k},{v};")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tag list operations
// ---------------------------------------------------------------------------

fn position_of_type(tags: &[String], tag_type: &str) -> Option<(usize, TagRecord)> {
    tags.iter().enumerate().find_map(|(i, raw)| {
        TagRecord::parse(raw)
            .filter(|record| record.tag_type == tag_type)
            .map(|record| (i, record))
    })
}

/// Value stored under `key` in the first tag of `tag_type`.
pub fn get_value(tags: &[String], tag_type: &str, key: &str) -> Option<String> {
    position_of_type(tags, tag_type).and_then(|(_, record)| record.get(key).map(str::to_owned))
}

pub fn has_type(tags: &[String], tag_type: &str) -> bool {
    position_of_type(tags, tag_type).is_some()
}

pub fn has_key(tags: &[String], tag_type: &str, key: &str) -> bool {
    position_of_type(tags, tag_type).is_some_and(|(_, record)| record.get(key).is_some())
}

/// Write `key,value` into the tag of `tag_type`, creating the tag if needed.
///
/// An existing key is left alone unless `overwrite` is set. Returns `true`
/// only if the stored value changed.
pub fn add_kv_pair(
    tags: &mut Vec<String>,
    tag_type: &str,
    key: &str,
    value: &str,
    overwrite: bool,
) -> bool {
    match position_of_type(tags, tag_type) {
        Some((index, mut record)) => {
            if !record.set(key, value, overwrite) {
                return false;
            }
            tags[index] = record.to_string();
            true
        }
        None => {
            let mut record = TagRecord::new(tag_type);
            record.set(key, value, true);
            tags.push(record.to_string());
            true
        }
    }
}

/// Remove `key` from the tag of `tag_type`. Returns `true` if it was present.
pub fn remove_key(tags: &mut [String], tag_type: &str, key: &str) -> bool {
    let Some((index, mut record)) = position_of_type(tags, tag_type) else {
        return false;
    };
    if !record.remove(key) {
        return false;
    }
    tags[index] = record.to_string();
    true
}

/// Remove every tag of `tag_type`. Returns `true` if anything was removed.
pub fn remove_type(tags: &mut Vec<String>, tag_type: &str) -> bool {
    let before = tags.len();
    tags.retain(|raw| TagRecord::parse(raw).map_or(true, |record| record.tag_type != tag_type));
    tags.len() != before
}

// ---------------------------------------------------------------------------
// TagStore
// ---------------------------------------------------------------------------

/// Owner-addressed access to persisted tags.
///
/// Implementors only expose the raw tag lists; the get/has/add/remove
/// contract is provided on top of them.
pub trait TagStore {
    /// Tags of `owner`, or `None` if the owner is unknown.
    fn tags(&self, owner: OwnerId) -> Option<&[String]>;

    /// Mutable tags of `owner`, or `None` if the owner is unknown.
    fn tags_mut(&mut self, owner: OwnerId) -> Option<&mut Vec<String>>;

    fn get_value(&self, owner: OwnerId, tag_type: &str, key: &str) -> Option<String> {
        self.tags(owner)
            .and_then(|tags| get_value(tags, tag_type, key))
            .filter(|value| !value.is_empty())
    }

    fn has_key(&self, owner: OwnerId, tag_type: &str, key: &str) -> bool {
        self.tags(owner)
            .is_some_and(|tags| has_key(tags, tag_type, key))
    }

    fn add_kv_pair(
        &mut self,
        owner: OwnerId,
        tag_type: &str,
        key: &str,
        value: &str,
        overwrite: bool,
    ) -> bool {
        self.tags_mut(owner)
            .is_some_and(|tags| add_kv_pair(tags, tag_type, key, value, overwrite))
    }

    fn remove_key(&mut self, owner: OwnerId, tag_type: &str, key: &str) -> bool {
        self.tags_mut(owner)
            .is_some_and(|tags| remove_key(tags, tag_type, key))
    }

    fn remove_type(&mut self, owner: OwnerId, tag_type: &str) -> bool {
        self.tags_mut(owner)
            .is_some_and(|tags| remove_type(tags, tag_type))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tags() -> Vec<String> {
        vec![
            "Other;Foo,1;".to_owned(),
            "SemLog;Id,abc;Class,Cup;".to_owned(),
        ]
    }

    // -- 1. Parsing ---------------------------------------------------------

    #[test]
    fn parse_reads_type_and_pairs_in_order() {
        let record = TagRecord::parse("SemLog;Id,abc;Class,Cup;").unwrap();
        assert_eq!(record.tag_type, "SemLog");
        assert_eq!(
            record.pairs,
            vec![
                ("Id".to_owned(), "abc".to_owned()),
                ("Class".to_owned(), "Cup".to_owned())
            ]
        );
        assert_eq!(record.to_string(), "SemLog;Id,abc;Class,Cup;");
    }

    #[test]
    fn parse_rejects_empty_type_and_skips_bare_segments() {
        assert!(TagRecord::parse(";Id,abc;").is_none());
        let record = TagRecord::parse("SemLog;junk;Id,a,b;").unwrap();
        assert_eq!(record.get("Id"), Some("a,b"));
        assert_eq!(record.pairs.len(), 1);
    }

    // -- 2. Queries ---------------------------------------------------------

    #[test]
    fn get_value_and_has_key_respect_tag_type() {
        let tags = sample_tags();
        assert_eq!(get_value(&tags, TAG_TYPE, ID_KEY).as_deref(), Some("abc"));
        assert_eq!(get_value(&tags, "Other", ID_KEY), None);
        assert!(has_key(&tags, "Other", "Foo"));
        assert!(!has_key(&tags, TAG_TYPE, "Foo"));
        assert!(has_type(&tags, TAG_TYPE));
        assert!(!has_type(&tags, "Missing"));
    }

    // -- 3. Mutation --------------------------------------------------------

    #[test]
    fn add_kv_pair_creates_tag_when_missing() {
        let mut tags = Vec::new();
        assert!(add_kv_pair(&mut tags, TAG_TYPE, ID_KEY, "x", false));
        assert_eq!(tags, vec!["SemLog;Id,x;".to_owned()]);
    }

    #[test]
    fn add_kv_pair_never_overwrites_without_flag() {
        let mut tags = sample_tags();
        assert!(!add_kv_pair(&mut tags, TAG_TYPE, ID_KEY, "zzz", false));
        assert_eq!(get_value(&tags, TAG_TYPE, ID_KEY).as_deref(), Some("abc"));

        assert!(add_kv_pair(&mut tags, TAG_TYPE, ID_KEY, "zzz", true));
        assert_eq!(get_value(&tags, TAG_TYPE, ID_KEY).as_deref(), Some("zzz"));
        assert_eq!(tags[1], "SemLog;Id,zzz;Class,Cup;", "key order preserved");
    }

    #[test]
    fn add_kv_pair_reports_unchanged_value() {
        let mut tags = sample_tags();
        assert!(!add_kv_pair(&mut tags, TAG_TYPE, CLASS_KEY, "Cup", true));
    }

    #[test]
    fn remove_key_and_type() {
        let mut tags = sample_tags();
        assert!(remove_key(&mut tags, TAG_TYPE, CLASS_KEY));
        assert!(!remove_key(&mut tags, TAG_TYPE, CLASS_KEY));
        assert_eq!(tags[1], "SemLog;Id,abc;");

        assert!(remove_type(&mut tags, TAG_TYPE));
        assert_eq!(tags, vec!["Other;Foo,1;".to_owned()]);
        assert!(!remove_type(&mut tags, TAG_TYPE));
    }

    #[test]
    fn bone_tag_type_is_suffixed() {
        assert_eq!(bone_tag_type(3), "SemLogBone3");
        let mut tags = sample_tags();
        add_kv_pair(&mut tags, &bone_tag_type(3), ID_KEY, "b3", false);
        assert_eq!(get_value(&tags, TAG_TYPE, ID_KEY).as_deref(), Some("abc"));
        assert_eq!(
            get_value(&tags, &bone_tag_type(3), ID_KEY).as_deref(),
            Some("b3")
        );
    }
}
