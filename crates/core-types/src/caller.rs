use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity facts about whoever submitted a query.
///
/// Authentication happens upstream; this only records what the host already knows.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Caller {
    pub id: Option<Value>,
    pub authenticated: bool,
    pub superuser: bool,
    pub staff: bool,
    pub groups: Vec<String>,
    pub attributes: Map<String, Value>,
    pub remote_addr: Option<IpAddr>,
    pub forwarded_for: Option<String>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(id: impl Into<Value>) -> Self {
        Self {
            id: Some(id.into()),
            authenticated: true,
            ..Self::default()
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn as_staff(mut self) -> Self {
        self.staff = true;
        self
    }

    pub fn as_superuser(mut self) -> Self {
        self.superuser = true;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_forwarded_for(mut self, header: impl Into<String>) -> Self {
        self.forwarded_for = Some(header.into());
        self
    }

    pub fn is_anonymous(&self) -> bool {
        !self.authenticated
    }

    /// Looks up a named caller attribute. `id` always resolves to the caller id.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        if name == "id" {
            return self.id.as_ref();
        }
        self.attributes.get(name)
    }

    /// Stable identity for an authenticated caller, used as a bucket key.
    pub fn identity_key(&self) -> Option<String> {
        if !self.authenticated {
            return None;
        }
        self.id.as_ref().map(|id| match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Network address of the caller. The forwarded header only counts when trusted.
    pub fn client_address(&self, trust_forwarded: bool) -> Option<String> {
        if trust_forwarded {
            let forwarded = self
                .forwarded_for
                .as_deref()
                .and_then(|header| header.split(',').next())
                .map(str::trim)
                .filter(|first| !first.is_empty());
            if let Some(first) = forwarded {
                return Some(first.to_string());
            }
        }
        self.remote_addr.map(|addr| addr.to_string())
    }
}
