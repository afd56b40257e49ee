use std::path::Path;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::place::Field;

/// What to read from a matched element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    #[default]
    Text,
    Href,
    Src,
    AriaLabel,
}

impl Source {
    fn js(self) -> &'static str {
        match self {
            Source::Text => "(el.innerText || el.textContent)",
            Source::Href => "(el.href || el.getAttribute('href'))",
            Source::Src => "(el.src || el.getAttribute('src'))",
            Source::AriaLabel => "el.getAttribute('aria-label')",
        }
    }
}

/// How one detail field is located. Selectors are tried in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    pub field: Field,
    pub selectors: Vec<String>,
    #[serde(default)]
    pub source: Source,
    /// Element to click before the field becomes visible (e.g. the hours toggle).
    #[serde(default)]
    pub expand: Option<String>,
    /// Characters removed from the extracted value.
    #[serde(default)]
    pub strip: Option<String>,
}

impl FieldRule {
    fn new(field: Field, selectors: &[&str]) -> Self {
        FieldRule {
            field,
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            source: Source::Text,
            expand: None,
            strip: None,
        }
    }

    fn source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    fn expand(mut self, selector: &str) -> Self {
        self.expand = Some(selector.to_string());
        self
    }

    fn strip(mut self, chars: &str) -> Self {
        self.strip = Some(chars.to_string());
        self
    }

    /// Post-process a raw extracted value: drop `strip` characters and
    /// collapse whitespace runs (hours tables come back one row per line).
    pub fn clean(&self, raw: String) -> String {
        static WS: OnceLock<Regex> = OnceLock::new();
        let ws = WS.get_or_init(|| Regex::new(r"\s+").unwrap());

        let raw = match &self.strip {
            Some(chars) => raw.replace(|c: char| chars.contains(c), ""),
            None => raw,
        };
        ws.replace_all(raw.trim(), " ").into_owned()
    }
}

/// A click performed before the list is visible: first element matching
/// `selector` whose text contains one of `text` (any element if empty).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickStep {
    pub selector: String,
    #[serde(default)]
    pub text: Vec<String>,
}

/// Site markup for one version of the saved-places UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorSet {
    pub name: String,
    /// Page to open when no start URL is configured.
    #[serde(default)]
    pub start_url: Option<String>,
    #[serde(default)]
    pub signed_in: Vec<String>,
    #[serde(default)]
    pub open_list: Vec<ClickStep>,
    pub list_ready: String,
    pub list_entry: String,
    pub entry_name: Vec<String>,
    pub detail_ready: String,
    pub close_button: Vec<String>,
    pub fields: Vec<FieldRule>,
}

pub const BUILTIN: &[&str] = &["favorites-list", "saved-menu"];

impl SelectorSet {
    /// A built-in set by name, or a TOML/JSON file describing one.
    pub fn resolve(name: &str) -> Result<SelectorSet> {
        if let Some(set) = Self::builtin(name) {
            return Ok(set);
        }
        let path = Path::new(name);
        if !path.exists() {
            bail!(
                "unknown selector set {:?} (built-in: {}; or a path to a .toml/.json file)",
                name,
                BUILTIN.join(", ")
            );
        }
        let set: SelectorSet = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| format!("Failed to load selector set from {}", path.display()))?;
        set.validate()?;
        Ok(set)
    }

    pub fn builtin(name: &str) -> Option<SelectorSet> {
        match name {
            "favorites-list" => Some(favorites_list()),
            "saved-menu" => Some(saved_menu()),
            _ => None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.entry_name.is_empty() {
            bail!("selector set {:?} has no entry_name selectors", self.name);
        }
        if let Some(rule) = self.fields.iter().find(|r| r.selectors.is_empty()) {
            bail!("field {} has no selectors", rule.field.as_str());
        }
        Ok(())
    }

    // ── Scripts ──
    //
    // Every script opens with a `/* places:<op> */` tag so it can be told
    // apart in devtools logs.

    pub fn signed_in_script(&self) -> String {
        format!(
            "/* places:signed-in */\n{}.some(s => document.querySelector(s) !== null)",
            js(&self.signed_in)
        )
    }

    pub fn click_script(&self, index: usize) -> Option<String> {
        let step = self.open_list.get(index)?;
        Some(format!(
            "/* places:click:{index} */\n\
             (() => {{\n\
               const texts = {texts};\n\
               for (const el of document.querySelectorAll({sel})) {{\n\
                 const label = (el.innerText || el.textContent || '').trim();\n\
                 if (texts.length === 0 || texts.some(t => label.includes(t))) {{\n\
                   el.click();\n\
                   return true;\n\
                 }}\n\
               }}\n\
               return false;\n\
             }})()",
            index = index,
            texts = js(&step.text),
            sel = js(&step.selector),
        ))
    }

    pub fn list_ready_script(&self) -> String {
        format!(
            "/* places:list-ready */\ndocument.querySelector({}) !== null",
            js(&self.list_ready)
        )
    }

    /// Evaluates to a JSON array of entry names in DOM order.
    pub fn list_script(&self) -> String {
        format!(
            "/* places:list */\n\
             (() => {{\n\
               {label}\n\
               return JSON.stringify(Array.from(document.querySelectorAll({entry})).map(label));\n\
             }})()",
            label = self.label_fn(),
            entry = js(&self.list_entry),
        )
    }

    /// Scrolls the entry named `target` into view and clicks it.
    /// Evaluates to `{"found": bool}`.
    pub fn open_script(&self, target: &str) -> String {
        format!(
            "/* places:open */\n\
             (() => {{\n\
               const target = {target};\n\
               {label}\n\
               for (const item of document.querySelectorAll({entry})) {{\n\
                 if (label(item) !== target) continue;\n\
                 item.scrollIntoView({{ block: 'center' }});\n\
                 (item.closest('button') || item.querySelector('button') || item).click();\n\
                 return JSON.stringify({{ found: true }});\n\
               }}\n\
               return JSON.stringify({{ found: false }});\n\
             }})()",
            target = js(target),
            label = self.label_fn(),
            entry = js(&self.list_entry),
        )
    }

    pub fn detail_ready_script(&self) -> String {
        format!(
            "/* places:detail-ready */\ndocument.querySelector({}) !== null",
            js(&self.detail_ready)
        )
    }

    pub fn field_script(&self, rule: &FieldRule) -> String {
        format!(
            "/* places:field:{name} */\n\
             (() => {{\n\
               for (const s of {sels}) {{\n\
                 const el = document.querySelector(s);\n\
                 if (!el) continue;\n\
                 const v = {read};\n\
                 if (v && v.trim()) return v.trim();\n\
               }}\n\
               return null;\n\
             }})()",
            name = rule.field.as_str(),
            sels = js(&rule.selectors),
            read = rule.source.js(),
        )
    }

    pub fn expand_script(&self, rule: &FieldRule) -> Option<String> {
        let selector = rule.expand.as_ref()?;
        Some(format!(
            "/* places:expand:{name} */\n\
             (() => {{\n\
               const el = document.querySelector({sel});\n\
               if (!el) return false;\n\
               el.click();\n\
               return true;\n\
             }})()",
            name = rule.field.as_str(),
            sel = js(selector),
        ))
    }

    pub fn expanded_script(&self, rule: &FieldRule) -> String {
        format!(
            "/* places:expanded:{name} */\n{sels}.some(s => document.querySelector(s) !== null)",
            name = rule.field.as_str(),
            sels = js(&rule.selectors),
        )
    }

    /// Clicks the first close button found, else goes back in history.
    pub fn close_script(&self) -> String {
        format!(
            "/* places:close */\n\
             (() => {{\n\
               for (const s of {sels}) {{\n\
                 const el = document.querySelector(s);\n\
                 if (el) {{ el.click(); return 'button'; }}\n\
               }}\n\
               history.back();\n\
               return 'back';\n\
             }})()",
            sels = js(&self.close_button),
        )
    }

    fn label_fn(&self) -> String {
        format!(
            "const label = item => {{\n\
               for (const s of {names}) {{\n\
                 const el = item.querySelector(s);\n\
                 const t = el ? (el.textContent || '').trim() : '';\n\
                 if (t) return t;\n\
               }}\n\
               return '';\n\
             }};",
            names = js(&self.entry_name),
        )
    }
}

fn js<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

fn detail_fields() -> Vec<FieldRule> {
    vec![
        FieldRule::new(
            Field::Address,
            &[
                "button[data-item-id='address']",
                "div[data-item-id='address']",
                "button[data-item-id*='address']",
            ],
        ),
        FieldRule::new(
            Field::Phone,
            &["button[data-item-id*='phone']", "div[data-item-id*='phone']"],
        ),
        FieldRule::new(
            Field::Website,
            &[
                "a[data-item-id='authority']",
                "a[data-item-id*='authority']",
                "div[data-item-id='authority'] a",
            ],
        )
        .source(Source::Href),
        FieldRule::new(
            Field::Category,
            &["button[jsaction*='categoryClick']", "div[jsaction*='categoryClick']"],
        ),
        FieldRule::new(
            Field::Rating,
            &["div.F7nice span[aria-hidden='true']", "span.ceNzKf", "span.fontDisplayLarge", ".MW4etd"],
        ),
        FieldRule::new(
            Field::ReviewCount,
            &["button[jsaction*='pane.rating.moreReviews']", ".UY7F9"],
        )
        .strip("()"),
        FieldRule::new(Field::PriceLevel, &["span[aria-label*='Price']", "span.rogA2c"]),
        FieldRule::new(Field::OpeningHours, &["div.t39EBf", "table.WgFkxc"])
            .expand("button[data-item-id*='oh'], div[data-item-id*='oh']"),
        FieldRule::new(
            Field::ImageUrl,
            &["button[jsaction*='pane.heroHeaderImage'] img"],
        )
        .source(Source::Src),
        FieldRule::new(Field::Description, &["div.PYvSYb", "div[aria-label^='About'] div"]),
    ]
}

/// Opened directly from a shared favorites-list URL.
fn favorites_list() -> SelectorSet {
    SelectorSet {
        name: "favorites-list".into(),
        start_url: None,
        signed_in: vec![
            "a[aria-label*='Google Account']".into(),
            "img.gbii[src*='googleusercontent.com']".into(),
        ],
        open_list: Vec::new(),
        list_ready: "div.m6QErb".into(),
        list_entry: "div.m6QErb div[role='article'], div.m6QErb div.Nv2PK".into(),
        entry_name: vec![
            "div.qBF1Pd".into(),
            ".fontHeadlineSmall".into(),
            "div.fontHeadlineLarge".into(),
        ],
        detail_ready: "h1.DUwDvf, button[data-item-id*='address'], a[data-item-id*='authority']"
            .into(),
        close_button: vec![
            "button[aria-label='Close']".into(),
            "button[jsaction*='pane.close']".into(),
        ],
        fields: detail_fields(),
    }
}

/// Starts from the maps home page and walks Saved → Favorites.
fn saved_menu() -> SelectorSet {
    SelectorSet {
        name: "saved-menu".into(),
        start_url: Some("https://www.google.com/maps".into()),
        open_list: vec![
            ClickStep {
                selector: "button".into(),
                text: vec!["Saved".into()],
            },
            ClickStep {
                selector: "button".into(),
                text: vec!["Favorites".into(), "Starred".into()],
            },
        ],
        ..favorites_list()
    }
}
