use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use flexquery_core_types::{FlexError, FlexResult};
use flexquery_policy_center::PaginationSettings;
use serde::{Deserialize, Serialize};

use crate::spec::QuerySpec;

/// Effective limit and offset for one list request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PagePlan {
    pub limit: u32,
    pub offset: u64,
    /// The caller's limit when it exceeded the configured maximum.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clamped_from: Option<u64>,
}

impl PagePlan {
    /// One extra row tells whether another page exists without a count query.
    pub fn fetch_limit(&self) -> u64 {
        u64::from(self.limit) + 1
    }

    pub fn next_offset(&self) -> u64 {
        self.offset + u64::from(self.limit)
    }

    /// The same specification advanced by one page.
    pub fn continuation(&self, spec: &QuerySpec) -> QuerySpec {
        let mut next = spec.clone();
        next.limit = Some(i64::from(self.limit));
        next.offset = i64::try_from(self.next_offset()).ok();
        next
    }

    pub fn page_info(&self, has_more: bool, spec: &QuerySpec) -> PageInfo {
        PageInfo {
            offset: self.offset,
            limit: self.limit,
            has_more,
            next: has_more.then(|| self.continuation(spec)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub offset: u64,
    pub limit: u32,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<QuerySpec>,
}

#[derive(Clone, Copy, Debug)]
pub struct PaginationPlanner {
    default_limit: u32,
    max_limit: u32,
}

impl PaginationPlanner {
    pub fn new(settings: &PaginationSettings) -> Self {
        Self {
            default_limit: settings.default_limit,
            max_limit: settings.max_limit,
        }
    }

    /// Clamps oversized limits instead of failing; rejects non-positive limits and negative offsets.
    pub fn plan(&self, limit: Option<i64>, offset: Option<i64>) -> FlexResult<PagePlan> {
        let (limit, clamped_from) = match limit {
            None => (self.default_limit.min(self.max_limit), None),
            Some(requested) if requested < 1 => {
                return Err(FlexError::validation(format!(
                    "limit must be at least 1, got {requested}"
                )))
            }
            Some(requested) if requested > i64::from(self.max_limit) => {
                (self.max_limit, Some(requested as u64))
            }
            Some(requested) => (requested as u32, None),
        };
        let offset = match offset {
            None => 0,
            Some(value) if value < 0 => {
                return Err(FlexError::validation(format!(
                    "offset must not be negative, got {value}"
                )))
            }
            Some(value) => value as u64,
        };
        Ok(PagePlan {
            limit,
            offset,
            clamped_from,
        })
    }
}

/// Opaque URL-safe form of a continuation descriptor.
pub fn encode_continuation(spec: &QuerySpec) -> FlexResult<String> {
    let raw = serde_json::to_vec(spec)
        .map_err(|err| FlexError::internal(format!("continuation encode failed: {err}")))?;
    Ok(URL_SAFE_NO_PAD.encode(raw))
}

pub fn decode_continuation(token: &str) -> FlexResult<QuerySpec> {
    let raw = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|err| FlexError::validation(format!("malformed continuation token: {err}")))?;
    Ok(serde_json::from_slice(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexquery_core_types::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn planner() -> PaginationPlanner {
        PaginationPlanner::new(&PaginationSettings {
            default_limit: 50,
            max_limit: 200,
        })
    }

    #[test]
    fn defaults_and_clamping() {
        let plan = planner().plan(None, None).unwrap();
        assert_eq!((plan.limit, plan.offset, plan.clamped_from), (50, 0, None));

        let plan = planner().plan(Some(500), Some(20)).unwrap();
        assert_eq!(plan.limit, 200);
        assert_eq!(plan.clamped_from, Some(500));
        assert_eq!(plan.fetch_limit(), 201);

        let plan = planner().plan(Some(200), None).unwrap();
        assert_eq!(plan.clamped_from, None);
    }

    #[test]
    fn rejects_negative_offset_and_empty_limit() {
        assert_eq!(
            planner().plan(None, Some(-1)).unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            planner().plan(Some(0), None).unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn continuation_advances_by_effective_limit() {
        let spec = QuerySpec {
            fields: vec!["id".into()],
            filters: json!({"status": "published"}),
            order_by: vec!["-id".into()],
            limit: Some(500),
            offset: Some(0),
        };
        let plan = planner().plan(spec.limit, spec.offset).unwrap();
        let info = plan.page_info(true, &spec);
        let next = info.next.unwrap();
        assert_eq!(next.offset, Some(200));
        assert_eq!(next.limit, Some(200));
        assert_eq!(next.filters, spec.filters);
        assert!(plan.page_info(false, &spec).next.is_none());
    }

    #[test]
    fn token_restores_the_descriptor() {
        let spec = QuerySpec {
            fields: vec!["id".into(), "title".into()],
            filters: json!({"or": [{"status": "draft"}, {"status": "published"}]}),
            order_by: vec![],
            limit: Some(10),
            offset: Some(30),
        };
        let token = encode_continuation(&spec).unwrap();
        assert!(!token.contains('='));
        assert_eq!(decode_continuation(&token).unwrap(), spec);
        assert_eq!(
            decode_continuation("not base64!").unwrap_err().kind(),
            ErrorKind::Validation
        );
    }
}
