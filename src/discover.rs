use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::DiscoveryError;
use crate::selectors::SelectorSet;
use crate::session::{wait_until, PageSession, Wait};

/// Read the saved-places list from the current page.
///
/// Returns entry names in DOM order with blanks dropped and repeats removed.
pub async fn discover<S: PageSession + ?Sized>(
    session: &mut S,
    selectors: &SelectorSet,
    wait: Wait,
) -> Result<Vec<String>, DiscoveryError> {
    if !wait_until(session, &selectors.list_ready_script(), wait).await? {
        return Err(DiscoveryError::ListUnavailable {
            waited_ms: wait.timeout_ms,
        });
    }

    let raw = session
        .evaluate(&selectors.list_script())
        .await?
        .ok_or_else(|| DiscoveryError::Malformed("list script returned nothing".into()))?;
    let names = parse_names(&raw)?;
    let total = names.len();
    let unique = dedup_names(names);

    info!("Found {} saved places ({} list entries)", unique.len(), total);
    Ok(unique)
}

/// Accepts `["A", "B"]` or `[{"name": "A"}, ...]`; unnamed entries become "".
fn parse_names(raw: &str) -> Result<Vec<String>, DiscoveryError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
    let items = value
        .as_array()
        .ok_or_else(|| DiscoveryError::Malformed(format!("expected an array, got {}", raw)))?;

    Ok(items
        .iter()
        .map(|item| match item {
            Value::String(s) => s.clone(),
            Value::Object(obj) => obj
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        })
        .collect())
}

/// Trim, drop empties, keep the first occurrence of each name.
pub fn dedup_names(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| {
            if n.is_empty() {
                debug!("Dropping list entry without a name");
                return false;
            }
            seen.insert(n.clone())
        })
        .collect()
}
