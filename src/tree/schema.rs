//! Tree layout: version roots, tag-to-path mapping and selection syntax.

use std::collections::BTreeMap;

use crate::error::{OmadmError, Result};

/// Leaf holding the DM protocol version the engine was provisioned with.
pub const VERSION_NODE_PATH: &str = "./DevInfo/DmV";

/// Tag carrying the unique server identifier of a profile.
pub const UNIQUE_TAG: &str = "PROVIDER-ID";
/// Tag naming the profile's root node under the account root.
pub const PROFILE_NAME_TAG: &str = "DMUNIQUENAME";
/// Tag carrying a hex encoded bootstrap document.
pub const BLOB_TAG: &str = "BLOB";

const APPID_TAG: &str = "APPID";
const APPID_VALUE: &str = "w7";
const TAG_DELIMITER: char = '/';

/// Column accepted in `rootnode='<name>'` selections.
pub const SELECTION_COLUMN: &str = "rootnode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeVersion {
    V1_1_2,
    V1_2,
}

impl TreeVersion {
    pub fn from_node_value(value: &str) -> Option<Self> {
        match value.trim() {
            "1.2" => Some(TreeVersion::V1_2),
            "1.1.2" => Some(TreeVersion::V1_1_2),
            _ => None,
        }
    }

    /// Interior node under which every server profile lives.
    pub fn account_root(&self) -> &'static str {
        match self {
            TreeVersion::V1_2 => "./DMAcc",
            TreeVersion::V1_1_2 => "./SyncML/DMAcc",
        }
    }

    /// Leaf name of the server identifier inside a profile.
    pub fn server_id_node(&self) -> &'static str {
        match self {
            TreeVersion::V1_2 => "ServerID",
            TreeVersion::V1_1_2 => "ServerId",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TreeVersion::V1_2 => "1.2",
            TreeVersion::V1_1_2 => "1.1.2",
        }
    }
}

fn segment_for_tag(tag: &str) -> &str {
    match tag {
        "APPID" => "AppID",
        "PROVIDER-ID" => "ServerID",
        "NAME" => "Name",
        "APPADDR" => "AppAddr",
        "ADDR" => "Addr",
        "ADDRTYPE" => "AddrType",
        "PORT" => "Port",
        "PORTNBR" => "PortNbr",
        "APPAUTH" => "AppAuth",
        "AAUTHLEVEL" => "AAuthLevel",
        "AAUTHTYPE" => "AAuthType",
        "AAUTHNAME" => "AAuthName",
        "AAUTHSECRET" => "AAuthSecret",
        "AAUTHDATA" => "AAuthData",
        other => other,
    }
}

/// Node paths for a tag-based profile insert on the 1.2 layout.
///
/// Keys are absolute paths; `None` marks an interior node, `Some` a leaf
/// with its value. The profile root itself is always present.
pub fn profile_node_paths(tags: &BTreeMap<String, String>) -> Result<BTreeMap<String, Option<String>>> {
    let profile = tags
        .get(PROFILE_NAME_TAG)
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| OmadmError::InvalidRequest(format!("missing {}", PROFILE_NAME_TAG)))?;
    if profile.contains(TAG_DELIMITER) {
        return Err(OmadmError::InvalidRequest(format!(
            "profile name '{}' must be a single segment",
            profile
        )));
    }

    let root = format!("{}/{}", TreeVersion::V1_2.account_root(), profile);
    let mut nodes = BTreeMap::new();
    nodes.insert(root.clone(), None);

    let appid = (APPID_TAG.to_string(), APPID_VALUE.to_string());
    let entries = tags
        .iter()
        .filter(|(tag, _)| tag.as_str() != PROFILE_NAME_TAG && tag.as_str() != APPID_TAG)
        .chain(std::iter::once((&appid.0, &appid.1)));

    for (tag, value) in entries {
        if value.is_empty() {
            return Err(OmadmError::InvalidRequest(format!("empty value for {}", tag)));
        }
        let segments: Vec<&str> = tag.split(TAG_DELIMITER).filter(|s| !s.is_empty()).collect();
        let Some((leaf, interiors)) = segments.split_last() else {
            return Err(OmadmError::InvalidRequest(format!("malformed tag '{}'", tag)));
        };

        let mut path = root.clone();
        for segment in interiors {
            path.push('/');
            path.push_str(segment_for_tag(segment));
            if let Some(Some(_)) = nodes.get(&path) {
                return Err(conflicting_node(tag, &path));
            }
            nodes.insert(path.clone(), None);
        }
        path.push('/');
        path.push_str(segment_for_tag(leaf));
        if nodes.contains_key(&path) {
            return Err(conflicting_node(tag, &path));
        }
        nodes.insert(path, Some(value.clone()));
    }
    Ok(nodes)
}

/// A node can be a leaf or an interior, and a leaf gets one value.
fn conflicting_node(tag: &str, path: &str) -> OmadmError {
    OmadmError::InvalidRequest(format!("tag '{}' conflicts with existing node {}", tag, path))
}

/// Nodes ordered so every parent precedes its descendants. Equal lengths keep path order.
pub fn creation_order(nodes: &BTreeMap<String, Option<String>>) -> Vec<(&str, Option<&str>)> {
    let mut ordered: Vec<(&str, Option<&str>)> = nodes
        .iter()
        .map(|(path, value)| (path.as_str(), value.as_deref()))
        .collect();
    ordered.sort_by_key(|(path, _)| path.len());
    ordered
}

/// Extract `<name>` from a selection of the exact form `rootnode='<name>'`.
pub fn parse_selection(selection: &str) -> Result<String> {
    let invalid = || OmadmError::InvalidSelection(selection.to_string());
    let rest = selection
        .strip_prefix(SELECTION_COLUMN)
        .and_then(|rest| rest.strip_prefix("='"))
        .ok_or_else(invalid)?;
    let name = rest.strip_suffix('\'').ok_or_else(invalid)?;
    if name.is_empty() || name.contains('\'') {
        return Err(invalid());
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_version_roots() {
        let v12 = TreeVersion::from_node_value("1.2").unwrap();
        assert_eq!(v12.account_root(), "./DMAcc");
        assert_eq!(v12.server_id_node(), "ServerID");

        let v112 = TreeVersion::from_node_value(" 1.1.2 ").unwrap();
        assert_eq!(v112.account_root(), "./SyncML/DMAcc");
        assert_eq!(v112.server_id_node(), "ServerId");

        assert_eq!(TreeVersion::from_node_value("2.0"), None);
    }

    #[test]
    fn test_profile_paths_map_tags() {
        let nodes = profile_node_paths(&tags(&[
            ("DMUNIQUENAME", "p1"),
            ("PROVIDER-ID", "srv"),
            ("APPADDR/ADDR", "https://dm.example.com"),
        ]))
        .unwrap();

        assert_eq!(nodes.get("./DMAcc/p1"), Some(&None));
        assert_eq!(nodes.get("./DMAcc/p1/ServerID"), Some(&Some("srv".to_string())));
        assert_eq!(nodes.get("./DMAcc/p1/AppID"), Some(&Some("w7".to_string())));
        assert_eq!(nodes.get("./DMAcc/p1/AppAddr"), Some(&None));
        assert_eq!(
            nodes.get("./DMAcc/p1/AppAddr/Addr"),
            Some(&Some("https://dm.example.com".to_string()))
        );
        assert_eq!(nodes.len(), 5);
    }

    #[test]
    fn test_unknown_tags_keep_their_name() {
        let nodes = profile_node_paths(&tags(&[
            ("DMUNIQUENAME", "p1"),
            ("PROVIDER-ID", "srv"),
            ("Ext", "x"),
        ]))
        .unwrap();
        assert!(nodes.contains_key("./DMAcc/p1/Ext"));
    }

    #[test]
    fn test_profile_paths_reject_bad_input() {
        assert!(profile_node_paths(&tags(&[("PROVIDER-ID", "srv")])).is_err());
        assert!(profile_node_paths(&tags(&[
            ("DMUNIQUENAME", "p1"),
            ("NAME", ""),
        ]))
        .is_err());
        assert!(profile_node_paths(&tags(&[("DMUNIQUENAME", "a/b")])).is_err());
    }

    #[test]
    fn test_profile_paths_reject_conflicting_nodes() {
        // Leaf first, then used as an interior
        let err = profile_node_paths(&tags(&[
            ("DMUNIQUENAME", "p1"),
            ("NAME", "Operator"),
            ("NAME/X", "y"),
        ]))
        .unwrap_err();
        assert!(matches!(err, OmadmError::InvalidRequest(_)));

        // Interior first, then written as a leaf
        assert!(profile_node_paths(&tags(&[
            ("DMUNIQUENAME", "p1"),
            ("APPADDR/ADDR", "https://dm.example.com"),
            ("AppAddr", "x"),
        ]))
        .is_err());

        // Two tags naming the same leaf
        assert!(profile_node_paths(&tags(&[
            ("DMUNIQUENAME", "p1"),
            ("NAME", "a"),
            ("Name", "b"),
        ]))
        .is_err());

        // A caller-supplied AppID segment collides with the fixed one
        assert!(profile_node_paths(&tags(&[("DMUNIQUENAME", "p1"), ("AppID", "x")])).is_err());
    }

    #[test]
    fn test_parse_selection() {
        assert_eq!(parse_selection("rootnode='p1'").unwrap(), "p1");
        for bad in ["", "rootnode=''", "rootnode=p1", "name='p1'", "rootnode='p1", "rootnode='a'b'"] {
            assert!(parse_selection(bad).is_err(), "{} should be rejected", bad);
        }
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn prop_parents_created_before_children(
                segments in proptest::collection::vec("[A-Z]{1,6}(/[A-Z]{1,6}){0,2}", 1..8)
            ) {
                let mut input = tags(&[("DMUNIQUENAME", "p"), ("PROVIDER-ID", "srv")]);
                for tag in segments {
                    input.insert(tag, "v".to_string());
                }
                // A tag that is also the prefix of another tag is rejected; only check accepted layouts.
                if let Ok(nodes) = profile_node_paths(&input) {
                    let order: Vec<&str> = creation_order(&nodes).into_iter().map(|(path, _)| path).collect();
                    prop_assert_eq!(order.len(), nodes.len());
                    prop_assert_eq!(order[0], "./DMAcc/p");
                    for (i, path) in order.iter().enumerate() {
                        for later in &order[i + 1..] {
                            let later_prefix = format!("{}/", later);
                            prop_assert!(!path.starts_with(&later_prefix));
                        }
                    }
                    for pair in order.windows(2) {
                        prop_assert!(pair[0].len() <= pair[1].len());
                    }
                }
            }
        }
    }
}
