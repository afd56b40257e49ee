use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::PageSession;
use crate::error::SessionError;
use crate::settings::BrowserSettings;

/// A Chromium tab driven over the DevTools protocol.
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    closed: Arc<AtomicBool>,
}

impl ChromeSession {
    pub async fn launch(settings: &BrowserSettings) -> Result<Self, SessionError> {
        let mut builder =
            BrowserConfig::builder().window_size(settings.window_width, settings.window_height);
        if !settings.headless {
            builder = builder.with_head();
        }
        if let Some(dir) = &settings.user_data_dir {
            builder = builder.user_data_dir(dir);
        }
        if let Some(exe) = &settings.chrome_executable {
            builder = builder.chrome_executable(exe);
        }
        let config = builder.build().map_err(SessionError::Launch)?;

        info!("Launching browser (headless: {})", settings.headless);
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        let closed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closed);
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("browser handler event error: {}", e);
                }
            }
            flag.store(true, Ordering::SeqCst);
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| SessionError::Launch(format!("could not open a tab: {}", e)))?;

        Ok(ChromeSession {
            browser,
            page,
            handler,
            closed,
        })
    }

    pub async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Browser did not close cleanly: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("Browser process wait failed: {}", e);
        }
        self.handler.abort();
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PageSession for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<bool, SessionError> {
        self.ensure_open()?;
        match self.page.goto(url).await {
            Ok(page) => {
                if let Err(e) = page.wait_for_navigation().await {
                    warn!("Navigation to {} did not settle: {}", url, e);
                }
                Ok(true)
            }
            Err(e) => {
                warn!("Navigation to {} failed: {}", url, e);
                Ok(false)
            }
        }
    }

    async fn current_url(&mut self) -> Result<Option<String>, SessionError> {
        self.ensure_open()?;
        self.page
            .url()
            .await
            .map_err(|e| SessionError::Evaluate(e.to_string()))
    }

    async fn evaluate(&mut self, script: &str) -> Result<Option<String>, SessionError> {
        self.ensure_open()?;
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| SessionError::Evaluate(e.to_string()))?;
        Ok(value_text(result.value()))
    }
}

fn value_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_are_unquoted() {
        let v = Value::String("4.5".into());
        assert_eq!(value_text(Some(&v)).as_deref(), Some("4.5"));
    }

    #[test]
    fn structured_values_are_serialized() {
        let v = serde_json::json!(["A", "B"]);
        assert_eq!(value_text(Some(&v)).as_deref(), Some(r#"["A","B"]"#));
        assert_eq!(value_text(Some(&Value::Bool(true))).as_deref(), Some("true"));
    }

    #[test]
    fn null_and_undefined_are_absent() {
        assert_eq!(value_text(Some(&Value::Null)), None);
        assert_eq!(value_text(None), None);
    }
}
