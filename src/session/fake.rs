//! Scripted in-memory session for tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::PageSession;
use crate::error::SessionError;
use crate::place::Field;

type Responder = Box<dyn FnMut(&str) -> Result<Option<String>, SessionError> + Send>;

pub struct FakeSession {
    responder: Responder,
    url: Option<String>,
    navigable: bool,
    calls: Vec<String>,
}

impl FakeSession {
    pub fn scripted<F>(responder: F) -> Self
    where
        F: FnMut(&str) -> Result<Option<String>, SessionError> + Send + 'static,
    {
        FakeSession {
            responder: Box::new(responder),
            url: None,
            navigable: true,
            calls: Vec::new(),
        }
    }

    /// A session backed by a simulated saved-places page.
    pub fn site(site: Arc<Mutex<FakeSite>>) -> Self {
        Self::scripted(move |script| site.lock().unwrap().respond(script))
    }

    pub fn unreachable(mut self) -> Self {
        self.navigable = false;
        self
    }

    pub fn calls(&self) -> &[String] {
        &self.calls
    }
}

#[async_trait]
impl PageSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> Result<bool, SessionError> {
        self.calls.push(format!("navigate {}", url));
        if self.navigable {
            self.url = Some(url.to_string());
        }
        Ok(self.navigable)
    }

    async fn current_url(&mut self) -> Result<Option<String>, SessionError> {
        Ok(self.url.clone())
    }

    async fn evaluate(&mut self, script: &str) -> Result<Option<String>, SessionError> {
        self.calls.push(script.to_string());
        (self.responder)(script)
    }
}

#[derive(Default)]
pub struct FakePlace {
    pub fields: HashMap<Field, String>,
    /// Fields whose extraction script throws.
    pub failing: HashSet<Field>,
    /// Number of initial activations that render without contact fields.
    pub blank_attempts: usize,
    pub never_renders: bool,
    pub opened: usize,
}

impl FakePlace {
    pub fn with(mut self, field: Field, value: &str) -> Self {
        self.fields.insert(field, value.to_string());
        self
    }

    pub fn failing(mut self, field: Field) -> Self {
        self.failing.insert(field);
        self
    }
}

/// A saved-places list plus detail views, addressed by the `/* places:<op> */`
/// tag each generated script starts with.
#[derive(Default)]
pub struct FakeSite {
    /// Raw list entries in DOM order (may repeat or be blank).
    pub listed: Vec<String>,
    pub places: HashMap<String, FakePlace>,
    pub list_missing: bool,
    pub signed_out: bool,
    pub vanished: HashSet<String>,
    pub garbled: HashSet<String>,
    pub close_fails: bool,
    pub open: Option<String>,
    pub clicks: Vec<String>,
}

impl FakeSite {
    pub fn new(listed: &[&str]) -> Self {
        FakeSite {
            listed: listed.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn place(mut self, name: &str, place: FakePlace) -> Self {
        self.places.insert(name.to_string(), place);
        self
    }

    pub fn shared(self) -> Arc<Mutex<FakeSite>> {
        Arc::new(Mutex::new(self))
    }

    pub fn respond(&mut self, script: &str) -> Result<Option<String>, SessionError> {
        let tag = script
            .strip_prefix("/* places:")
            .and_then(|rest| rest.split(" */").next())
            .unwrap_or_default()
            .to_string();
        let (op, arg) = tag.split_once(':').unwrap_or((tag.as_str(), ""));

        let reply = match op {
            "signed-in" => bool_reply(!self.signed_out),
            "click" => {
                self.clicks.push(arg.to_string());
                bool_reply(true)
            }
            "list-ready" => bool_reply(!self.list_missing),
            "list" => Some(serde_json::to_string(&self.listed).unwrap()),
            "open" => {
                let target = target_of(script);
                if self.garbled.contains(&target) {
                    Some("<html>".to_string())
                } else if self.vanished.contains(&target) || !self.listed.contains(&target) {
                    Some(r#"{"found":false}"#.to_string())
                } else {
                    if let Some(place) = self.places.get_mut(&target) {
                        place.opened += 1;
                    }
                    self.open = Some(target);
                    Some(r#"{"found":true}"#.to_string())
                }
            }
            "detail-ready" => {
                let ready = self
                    .open_place()
                    .map(|p| !p.never_renders)
                    .unwrap_or(false);
                bool_reply(ready)
            }
            "field" | "expand" | "expanded" => {
                let field: Field =
                    serde_json::from_value(serde_json::Value::String(arg.to_string())).unwrap();
                let Some(place) = self.open_place() else {
                    return Ok(None);
                };
                if place.failing.contains(&field) {
                    return Err(SessionError::Evaluate(format!("{} lookup threw", arg)));
                }
                if op != "field" {
                    bool_reply(place.fields.contains_key(&field))
                } else if place.opened <= place.blank_attempts && Field::CONTACT.contains(&field) {
                    None
                } else {
                    place.fields.get(&field).cloned()
                }
            }
            "close" => {
                if self.close_fails {
                    return Err(SessionError::Evaluate("close button detached".into()));
                }
                self.open = None;
                bool_reply(true)
            }
            _ => None,
        };
        Ok(reply)
    }

    fn open_place(&self) -> Option<&FakePlace> {
        self.open.as_ref().and_then(|n| self.places.get(n))
    }
}

fn bool_reply(b: bool) -> Option<String> {
    Some(b.to_string())
}

/// Pull the JSON string literal from the `const target = "...";` line.
fn target_of(script: &str) -> String {
    script
        .lines()
        .find_map(|l| l.trim().strip_prefix("const target = "))
        .and_then(|lit| serde_json::from_str(lit.trim_end_matches(';')).ok())
        .unwrap_or_default()
}
