use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::FlexError;

/// The five operations a grant can allow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Get,
    #[serde(alias = "query")]
    List,
    #[serde(alias = "add")]
    Create,
    #[serde(alias = "edit")]
    Update,
    Delete,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Get,
        OperationKind::List,
        OperationKind::Create,
        OperationKind::Update,
        OperationKind::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Get => "get",
            OperationKind::List => "list",
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, OperationKind::Get | OperationKind::List)
    }

    /// Operations that address a single existing row by id.
    pub fn targets_row(&self) -> bool {
        matches!(
            self,
            OperationKind::Get | OperationKind::Update | OperationKind::Delete
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = FlexError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "get" => Ok(OperationKind::Get),
            "list" | "query" => Ok(OperationKind::List),
            "create" | "add" => Ok(OperationKind::Create),
            "update" | "edit" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(FlexError::validation(format!("unknown operation '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_map_to_canonical_operations() {
        assert_eq!("add".parse::<OperationKind>().unwrap(), OperationKind::Create);
        assert_eq!("EDIT".parse::<OperationKind>().unwrap(), OperationKind::Update);
        assert_eq!("query".parse::<OperationKind>().unwrap(), OperationKind::List);
        assert!("truncate".parse::<OperationKind>().is_err());
    }

    #[test]
    fn serde_accepts_aliases() {
        let ops: Vec<OperationKind> = serde_json::from_str(r#"["get","add","edit"]"#).unwrap();
        assert_eq!(
            ops,
            vec![OperationKind::Get, OperationKind::Create, OperationKind::Update]
        );
    }
}
