//! [`BrowserLauncher`] backed by a local Chromium over CDP.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    Cookie, CookieParam, CookieSameSite, TimeSinceEpoch,
};
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use xharvest_core::{AppConfig, OriginStorage, SessionSnapshot, StorageEntry, StoredCookie};

use super::{BrowserLauncher, BrowserPage};
use crate::error::HarvestError;

#[derive(Debug, Clone)]
pub struct ChromiumSettings {
    pub headless: bool,
    pub executable: Option<PathBuf>,
    pub navigation_timeout: Duration,
    pub operation_timeout: Duration,
}

impl ChromiumSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            headless: config.browser_headless,
            executable: config.browser_executable.clone(),
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
            operation_timeout: Duration::from_secs(config.operation_timeout_secs),
        }
    }
}

/// Launches one Chromium process per page so every job gets an isolated
/// cookie jar.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    settings: ChromiumSettings,
}

impl ChromiumLauncher {
    #[must_use]
    pub fn new(settings: ChromiumSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn open(
        &self,
        saved: Option<&SessionSnapshot>,
    ) -> Result<Box<dyn BrowserPage>, HarvestError> {
        let mut builder = BrowserConfig::builder();
        if !self.settings.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.settings.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(HarvestError::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(cdp)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::trace!(error = %e, "browser handler event error");
                }
            }
        });

        let mut running = Running {
            browser,
            handler,
            shutdown_timeout: self.settings.operation_timeout,
        };
        let page = match running.browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                running.shutdown().await;
                return Err(cdp(e));
            }
        };

        let page = ChromiumPage {
            page,
            running: Mutex::new(Some(running)),
            navigation_timeout: self.settings.navigation_timeout,
            operation_timeout: self.settings.operation_timeout,
        };

        if let Some(snapshot) = saved {
            if let Err(e) = page.restore(snapshot).await {
                if let Err(close_err) = page.close().await {
                    tracing::warn!(error = %close_err, "failed to close browser after restore failure");
                }
                return Err(e);
            }
        }

        Ok(Box::new(page))
    }
}

struct Running {
    browser: Browser,
    handler: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl Running {
    async fn shutdown(&mut self) {
        stop_process(&mut self.browser, self.shutdown_timeout).await;
        self.handler.abort();
    }
}

/// The parts of a browser process that teardown needs.
trait BrowserProcess {
    async fn close_and_wait(&mut self);
    async fn kill(&mut self);
}

impl BrowserProcess for Browser {
    async fn close_and_wait(&mut self) {
        if let Err(e) = self.close().await {
            tracing::warn!(error = %e, "browser did not close cleanly");
        }
        if let Err(e) = self.wait().await {
            tracing::warn!(error = %e, "waiting for browser process failed");
        }
    }

    async fn kill(&mut self) {
        if let Some(Err(e)) = Browser::kill(self).await {
            tracing::warn!(error = %e, "failed to kill browser process");
        }
    }
}

/// Closes `process`, killing it if it has not exited within `limit`.
/// Returns whether the kill was needed.
async fn stop_process<P: BrowserProcess>(process: &mut P, limit: Duration) -> bool {
    if tokio::time::timeout(limit, process.close_and_wait())
        .await
        .is_ok()
    {
        return false;
    }
    tracing::warn!(secs = limit.as_secs(), "browser did not exit in time; killing it");
    process.kill().await;
    true
}

pub struct ChromiumPage {
    page: Page,
    running: Mutex<Option<Running>>,
    navigation_timeout: Duration,
    operation_timeout: Duration,
}

impl ChromiumPage {
    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T, HarvestError>
    where
        F: Future<Output = Result<T, chromiumoxide::error::CdpError>> + Send,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result.map_err(cdp),
            Err(_) => Err(HarvestError::RenderTimeout {
                operation: operation.to_string(),
                secs: self.operation_timeout.as_secs(),
            }),
        }
    }

    async fn eval<T: DeserializeOwned>(
        &self,
        operation: &str,
        script: String,
    ) -> Result<T, HarvestError> {
        let result = self.bounded(operation, self.page.evaluate(script)).await?;
        result
            .into_value::<T>()
            .map_err(|e| HarvestError::Browser(format!("{operation}: unexpected result: {e}")))
    }

    async fn restore(&self, snapshot: &SessionSnapshot) -> Result<(), HarvestError> {
        let cookies = snapshot
            .cookies
            .iter()
            .map(cookie_param)
            .collect::<Result<Vec<_>, _>>()?;
        if !cookies.is_empty() {
            self.bounded("restore cookies", async {
                self.page.set_cookies(cookies).await.map(|_| ())
            })
            .await?;
        }

        for origin in snapshot.origins.iter().filter(|o| !o.local_storage.is_empty()) {
            self.goto(&origin.origin).await?;
            let entries = serde_json::to_string(&origin.local_storage)
                .map_err(|e| HarvestError::Browser(e.to_string()))?;
            let _: bool = self
                .eval(
                    "restore local storage",
                    format!(
                        "(() => {{ for (const e of {entries}) {{ localStorage.setItem(e.name, e.value); }} return true; }})()"
                    ),
                )
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<(), HarvestError> {
        match tokio::time::timeout(self.navigation_timeout, self.page.goto(url)).await {
            Ok(result) => result.map(|_| ()).map_err(cdp),
            Err(_) => Err(HarvestError::NavigationTimeout {
                url: url.to_string(),
                secs: self.navigation_timeout.as_secs(),
            }),
        }
    }

    async fn current_url(&self) -> Result<String, HarvestError> {
        let url = self.bounded("read page URL", self.page.url()).await?;
        Ok(url.unwrap_or_default())
    }

    async fn exists(&self, css: &str) -> Result<bool, HarvestError> {
        self.eval(
            "query selector",
            format!("document.querySelector({}) !== null", js_string(css)),
        )
        .await
    }

    async fn fill_and_submit(&self, css: &str, value: &str) -> Result<(), HarvestError> {
        self.bounded("fill form field", async {
            let element = self.page.find_element(css).await?;
            element.click().await?.type_str(value).await?.press_key("Enter").await?;
            Ok::<(), chromiumoxide::error::CdpError>(())
        })
        .await
    }

    async fn outer_html_all(&self, css: &str) -> Result<Vec<String>, HarvestError> {
        self.eval(
            "collect posts",
            format!(
                "Array.from(document.querySelectorAll({})).map(e => e.outerHTML)",
                js_string(css)
            ),
        )
        .await
    }

    async fn scroll_height(&self) -> Result<i64, HarvestError> {
        self.eval("read scroll height", "document.body.scrollHeight".to_string())
            .await
    }

    async fn scroll_to_bottom(&self) -> Result<(), HarvestError> {
        let _: bool = self
            .eval(
                "scroll",
                "(() => { window.scrollTo(0, document.body.scrollHeight); return true; })()"
                    .to_string(),
            )
            .await?;
        Ok(())
    }

    async fn storage_state(&self) -> Result<SessionSnapshot, HarvestError> {
        let cookies = self.bounded("read cookies", self.page.get_cookies()).await?;
        let (origin, entries): (String, Vec<StorageEntry>) = self
            .eval(
                "read local storage",
                "[window.location.origin, Object.entries(localStorage).map(([name, value]) => ({name, value}))]"
                    .to_string(),
            )
            .await?;

        let origins = if entries.is_empty() {
            Vec::new()
        } else {
            vec![OriginStorage {
                origin,
                local_storage: entries,
            }]
        };

        Ok(SessionSnapshot {
            cookies: cookies.into_iter().map(stored_cookie).collect(),
            origins,
        })
    }

    async fn close(&self) -> Result<(), HarvestError> {
        let Some(mut running) = self.running.lock().await.take() else {
            return Ok(());
        };
        running.shutdown().await;
        Ok(())
    }
}

fn cdp(e: chromiumoxide::error::CdpError) -> HarvestError {
    HarvestError::Browser(e.to_string())
}

/// JSON string literal, which is also a valid JavaScript string literal.
fn js_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

fn cookie_param(cookie: &StoredCookie) -> Result<CookieParam, HarvestError> {
    let mut builder = CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .domain(cookie.domain.clone())
        .path(cookie.path.clone())
        .secure(cookie.secure)
        .http_only(cookie.http_only);
    if cookie.expires >= 0.0 {
        builder = builder.expires(TimeSinceEpoch::new(cookie.expires));
    }
    if let Some(same_site) = cookie.same_site.as_deref().and_then(same_site) {
        builder = builder.same_site(same_site);
    }
    builder
        .build()
        .map_err(|e| HarvestError::Browser(format!("invalid saved cookie {}: {e}", cookie.name)))
}

fn same_site(raw: &str) -> Option<CookieSameSite> {
    match raw.to_ascii_lowercase().as_str() {
        "strict" => Some(CookieSameSite::Strict),
        "lax" => Some(CookieSameSite::Lax),
        "none" => Some(CookieSameSite::None),
        _ => None,
    }
}

fn stored_cookie(cookie: Cookie) -> StoredCookie {
    StoredCookie {
        same_site: cookie.same_site.map(|s| {
            match s {
                CookieSameSite::Strict => "Strict",
                CookieSameSite::Lax => "Lax",
                CookieSameSite::None => "None",
            }
            .to_string()
        }),
        name: cookie.name,
        value: cookie.value,
        domain: cookie.domain,
        path: cookie.path,
        expires: if cookie.session { -1.0 } else { cookie.expires },
        http_only: cookie.http_only,
        secure: cookie.secure,
    }
}
