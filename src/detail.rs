use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{DetailFetchError, SessionError};
use crate::place::PlaceRecord;
use crate::selectors::{FieldRule, SelectorSet};
use crate::session::{wait_until, PageSession, Wait};
use crate::settings::RetrySettings;

#[derive(Deserialize)]
struct OpenReply {
    found: bool,
}

/// Opens one place's detail view, reads its fields and returns to the list.
pub struct DetailFetcher<'a> {
    selectors: &'a SelectorSet,
    list_wait: Wait,
    detail_wait: Wait,
    expand_wait: Wait,
    retry: RetrySettings,
}

impl<'a> DetailFetcher<'a> {
    pub fn new(
        selectors: &'a SelectorSet,
        list_wait: Wait,
        detail_wait: Wait,
        expand_wait: Wait,
        retry: RetrySettings,
    ) -> Self {
        DetailFetcher {
            selectors,
            list_wait,
            detail_wait,
            expand_wait,
            retry,
        }
    }

    /// Fetch the place listed as `name`.
    ///
    /// An attempt that yields none of address/phone/website is treated as a
    /// half-rendered view and repeated, up to `retry.max_attempts` in total.
    /// The best record seen is returned even if every attempt came back thin.
    pub async fn fetch<S: PageSession + ?Sized>(
        &self,
        session: &mut S,
        name: &str,
    ) -> Result<PlaceRecord, DetailFetchError> {
        let max_attempts = self.retry.max_attempts.max(1);

        let mut record = match self.attempt(session, name).await {
            Ok(record) => record,
            Err(e) => {
                if matches!(e, DetailFetchError::RenderTimeout { .. }) {
                    self.close(session, name).await;
                }
                return Err(e);
            }
        };

        let mut attempt = 1;
        while !record.has_contact() && attempt < max_attempts {
            warn!(
                "No contact details for {} (attempt {}/{}), retrying",
                name, attempt, max_attempts
            );
            tokio::time::sleep(Duration::from_millis(self.retry.delay_ms)).await;
            attempt += 1;

            match self.attempt(session, name).await {
                Ok(next) => {
                    if next.has_contact() || next.populated() >= record.populated() {
                        record = next;
                    }
                }
                Err(DetailFetchError::Session(SessionError::Closed)) => {
                    return Err(SessionError::Closed.into());
                }
                Err(e) => {
                    warn!("Retry {} for {} failed, keeping partial record: {}", attempt, name, e);
                    break;
                }
            }
        }

        self.close(session, name).await;
        Ok(record)
    }

    async fn attempt<S: PageSession + ?Sized>(
        &self,
        session: &mut S,
        name: &str,
    ) -> Result<PlaceRecord, DetailFetchError> {
        let raw = session
            .evaluate(&self.selectors.open_script(name))
            .await?
            .ok_or_else(|| DetailFetchError::ParseError("open script returned nothing".into()))?;
        let reply: OpenReply = serde_json::from_str(&raw)
            .map_err(|e| {
                let head: String = raw.chars().take(80).collect();
                DetailFetchError::ParseError(format!("{}: {}", e, head))
            })?;
        if !reply.found {
            return Err(DetailFetchError::NotFound(name.to_string()));
        }

        if !wait_until(session, &self.selectors.detail_ready_script(), self.detail_wait).await? {
            return Err(DetailFetchError::RenderTimeout {
                name: name.to_string(),
                waited_ms: self.detail_wait.timeout_ms,
            });
        }

        let mut record = PlaceRecord::new(name);
        for rule in &self.selectors.fields {
            let value = self.extract(session, rule).await?;
            record.set(rule.field, value);
        }
        debug!("{}: {} fields", name, record.populated());
        Ok(record)
    }

    /// Read one field. Any failure other than a dead session leaves it absent.
    async fn extract<S: PageSession + ?Sized>(
        &self,
        session: &mut S,
        rule: &FieldRule,
    ) -> Result<Option<String>, SessionError> {
        let field = rule.field.as_str();

        if let Some(script) = self.selectors.expand_script(rule) {
            match session.evaluate(&script).await {
                Ok(Some(clicked)) if clicked == "true" => {
                    let shown =
                        wait_until(session, &self.selectors.expanded_script(rule), self.expand_wait)
                            .await?;
                    if !shown {
                        debug!("{} did not expand", field);
                    }
                }
                Ok(_) => debug!("No expander for {}", field),
                Err(SessionError::Closed) => return Err(SessionError::Closed),
                Err(e) => debug!("Expanding {} failed: {}", field, e),
            }
        }

        match session.evaluate(&self.selectors.field_script(rule)).await {
            Ok(Some(value)) => Ok(Some(rule.clean(value))),
            Ok(None) => {
                debug!("{} not present", field);
                Ok(None)
            }
            Err(SessionError::Closed) => Err(SessionError::Closed),
            Err(e) => {
                debug!("{} extraction failed: {}", field, e);
                Ok(None)
            }
        }
    }

    /// Leave the detail view. Failures are logged; the next place re-locates
    /// its entry from whatever the list looks like.
    async fn close<S: PageSession + ?Sized>(&self, session: &mut S, name: &str) {
        match session.evaluate(&self.selectors.close_script()).await {
            Ok(how) => debug!("Closed {} via {}", name, how.unwrap_or_default()),
            Err(e) => {
                warn!("Could not close detail view for {}: {}", name, e);
                return;
            }
        }
        match wait_until(session, &self.selectors.list_ready_script(), self.list_wait).await {
            Ok(true) => {}
            Ok(false) => warn!("List did not reappear after closing {}", name),
            Err(e) => warn!("List check after closing {} failed: {}", name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::place::Field;
    use crate::session::fake::{FakePlace, FakeSession, FakeSite};

    const WAIT: Wait = Wait::new(40, 5);

    fn fetcher(set: &SelectorSet) -> DetailFetcher<'_> {
        DetailFetcher::new(
            set,
            WAIT,
            WAIT,
            WAIT,
            RetrySettings {
                max_attempts: 3,
                delay_ms: 1,
            },
        )
    }

    fn tartine() -> FakePlace {
        FakePlace::default()
            .with(Field::Address, "600 Guerrero St, San Francisco")
            .with(Field::Phone, "(415) 487-2600")
            .with(Field::Rating, "4.5")
            .with(Field::ReviewCount, "(8,312)")
            .with(Field::Category, "Bakery")
            .with(Field::OpeningHours, "Mon-Sun 8am-5pm")
    }

    #[tokio::test]
    async fn extracts_all_present_fields() {
        let site = FakeSite::new(&["Tartine"]).place("Tartine", tartine()).shared();
        let mut session = FakeSession::site(site.clone());
        let set = SelectorSet::builtin("favorites-list").unwrap();

        let p = fetcher(&set).fetch(&mut session, "Tartine").await.unwrap();
        assert_eq!(p.name, "Tartine");
        assert_eq!(p.address.as_deref(), Some("600 Guerrero St, San Francisco"));
        assert_eq!(p.review_count.as_deref(), Some("8,312"));
        assert_eq!(p.opening_hours.as_deref(), Some("Mon-Sun 8am-5pm"));
        assert_eq!(p.website, None);
        assert!(session.calls().iter().any(|c| c.starts_with("/* places:expand:opening_hours")));
        // returned to the list
        assert!(site.lock().unwrap().open.is_none());
    }

    #[tokio::test]
    async fn failing_fields_are_absent_not_fatal() {
        let place = FakePlace::default()
            .with(Field::Address, "1 Main St")
            .with(Field::Phone, "555")
            .with(Field::Rating, "4.1")
            .failing(Field::Address)
            .failing(Field::Phone);
        let site = FakeSite::new(&["Nopa"]).place("Nopa", place).shared();
        let mut session = FakeSession::site(site);
        let set = SelectorSet::builtin("favorites-list").unwrap();

        let p = fetcher(&set).fetch(&mut session, "Nopa").await.unwrap();
        assert_eq!(p.name, "Nopa");
        assert_eq!(p.rating.as_deref(), Some("4.1"));
        assert_eq!(p.address, None);
        assert_eq!(p.phone, None);
    }

    #[tokio::test]
    async fn vanished_entry_is_not_found() {
        let mut site = FakeSite::new(&["Gone"]).place("Gone", tartine());
        site.vanished.insert("Gone".into());
        let mut session = FakeSession::site(site.shared());
        let set = SelectorSet::builtin("favorites-list").unwrap();

        let err = fetcher(&set).fetch(&mut session, "Gone").await.unwrap_err();
        assert!(matches!(err, DetailFetchError::NotFound(ref n) if n == "Gone"));
        // nothing was opened, so nothing is closed (closing falls back to history.back)
        assert!(!session.calls().iter().any(|c| c.starts_with("/* places:close")));
    }

    #[tokio::test]
    async fn render_timeout_still_closes() {
        let place = FakePlace {
            never_renders: true,
            ..tartine()
        };
        let site = FakeSite::new(&["Slow"]).place("Slow", place).shared();
        let mut session = FakeSession::site(site);
        let set = SelectorSet::builtin("favorites-list").unwrap();

        let err = fetcher(&set).fetch(&mut session, "Slow").await.unwrap_err();
        assert!(matches!(err, DetailFetchError::RenderTimeout { waited_ms: 40, .. }));
        assert!(session.calls().iter().any(|c| c.starts_with("/* places:close")));
    }

    #[tokio::test]
    async fn garbled_reply_is_parse_error() {
        let mut site = FakeSite::new(&["Odd"]).place("Odd", tartine());
        site.garbled.insert("Odd".into());
        let mut session = FakeSession::site(site.shared());
        let set = SelectorSet::builtin("favorites-list").unwrap();

        let err = fetcher(&set).fetch(&mut session, "Odd").await.unwrap_err();
        assert!(matches!(err, DetailFetchError::ParseError(_)));
    }

    #[tokio::test]
    async fn retries_until_contact_fields_render() {
        let place = FakePlace {
            blank_attempts: 1,
            ..tartine()
        };
        let site = FakeSite::new(&["Tartine"]).place("Tartine", place).shared();
        let mut session = FakeSession::site(site.clone());
        let set = SelectorSet::builtin("favorites-list").unwrap();

        let p = fetcher(&set).fetch(&mut session, "Tartine").await.unwrap();
        assert!(p.address.is_some());
        assert_eq!(site.lock().unwrap().places["Tartine"].opened, 2);
    }

    #[tokio::test]
    async fn keeps_partial_record_after_exhausting_retries() {
        let place = FakePlace {
            blank_attempts: 10,
            ..tartine()
        };
        let site = FakeSite::new(&["Tartine"]).place("Tartine", place).shared();
        let mut session = FakeSession::site(site.clone());
        let set = SelectorSet::builtin("favorites-list").unwrap();

        let p = fetcher(&set).fetch(&mut session, "Tartine").await.unwrap();
        assert!(!p.has_contact());
        assert_eq!(p.rating.as_deref(), Some("4.5"));
        assert_eq!(site.lock().unwrap().places["Tartine"].opened, 3);
    }

    #[tokio::test]
    async fn close_failure_is_not_fatal() {
        let mut site = FakeSite::new(&["Tartine"]).place("Tartine", tartine());
        site.close_fails = true;
        let mut session = FakeSession::site(site.shared());
        let set = SelectorSet::builtin("favorites-list").unwrap();

        let p = fetcher(&set).fetch(&mut session, "Tartine").await.unwrap();
        assert_eq!(p.category.as_deref(), Some("Bakery"));
    }
}
