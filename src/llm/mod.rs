pub mod prompt;
pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use prompt::Strategy;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    #[error("the translation backend returned no SQL")]
    EmptyResponse,
    #[error("the translation backend is unavailable: {0}")]
    BackendUnavailable(String),
    #[error("the translation backend did not answer within {0:?}")]
    Timeout(Duration),
    #[error("translation backend misconfigured: {0}")]
    Config(String),
}

/// A text-generation backend that turns a prompt into candidate SQL text.
#[async_trait]
pub trait SqlBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, TranslationError>;

    fn name(&self) -> &str;
}

/// Which configured backend serves a translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendRef {
    Primary,
    Assisted,
}

impl From<Strategy> for BackendRef {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Simple | Strategy::Complex => BackendRef::Primary,
            Strategy::ModelAssisted => BackendRef::Assisted,
        }
    }
}

/// A backend and the time allowed for one completion.
struct TimedBackend {
    backend: Arc<dyn SqlBackend>,
    timeout: Duration,
}

pub struct TranslationClient {
    primary: TimedBackend,
    assisted: Option<TimedBackend>,
}

impl TranslationClient {
    pub fn new(primary: Arc<dyn SqlBackend>, timeout: Duration) -> Self {
        Self {
            primary: TimedBackend {
                backend: primary,
                timeout,
            },
            assisted: None,
        }
    }

    /// Serves the model-assisted strategy from `backend`, bounded by its own timeout.
    pub fn with_assisted(mut self, backend: Arc<dyn SqlBackend>, timeout: Duration) -> Self {
        self.assisted = Some(TimedBackend { backend, timeout });
        self
    }

    pub fn from_config(
        primary: &LlmConfig,
        assisted: Option<&LlmConfig>,
    ) -> Result<Self, TranslationError> {
        let mut client = Self::new(
            providers::from_config(primary)?,
            Duration::from_secs(primary.timeout_secs),
        );
        if let Some(assisted) = assisted {
            client = client.with_assisted(
                providers::from_config(assisted)?,
                Duration::from_secs(assisted.timeout_secs),
            );
        }
        Ok(client)
    }

    fn backend(&self, backend: BackendRef) -> &TimedBackend {
        match backend {
            BackendRef::Primary => &self.primary,
            BackendRef::Assisted => self.assisted.as_ref().unwrap_or(&self.primary),
        }
    }

    /// Sends `prompt` to the chosen backend once and normalizes the answer.
    ///
    /// There is no retry: the first timeout ends the attempt.
    pub async fn translate(
        &self,
        prompt: &str,
        backend: BackendRef,
    ) -> Result<String, TranslationError> {
        let TimedBackend { backend, timeout } = self.backend(backend);
        info!("Sending prompt to backend '{}'", backend.name());
        debug!("Prompt: {}", prompt);

        let raw = match tokio::time::timeout(*timeout, backend.complete(prompt)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Backend '{}' timed out after {:?}", backend.name(), timeout);
                return Err(TranslationError::Timeout(*timeout));
            }
        };

        let sql = normalize_sql(&raw)?;
        info!("Generated SQL: {}", sql);
        Ok(sql)
    }
}

/// Turns raw generated text into a single SQL string.
///
/// Code fences and leading prose are stripped, then every double quote is
/// rewritten to a single quote. The quote rewrite is lossy: quoted
/// identifiers become string literals.
pub fn normalize_sql(raw: &str) -> Result<String, TranslationError> {
    if raw.trim().is_empty() {
        return Err(TranslationError::EmptyResponse);
    }

    let sql = extract_sql(raw).replace('"', "'");
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(TranslationError::EmptyResponse);
    }

    Ok(sql.to_string())
}

fn extract_sql(content: &str) -> String {
    // Between ```sql and ``` markers
    if let Some(start) = content.find("```sql") {
        let after = &content[start + 6..];
        let end = after.find("```").unwrap_or(after.len());
        return after[..end].trim().to_string();
    }

    // Bare ``` fences
    if let Some(start) = content.find("```") {
        let after = &content[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    // Prose before the statement: start from the first line opening with a keyword
    let lines: Vec<&str> = content.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        if starts_with_sql_keyword(line) {
            return lines[i..].join("\n").trim().to_string();
        }
    }

    content.trim().to_string()
}

const SQL_KEYWORDS: [&str; 8] = ["SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP"];

/// True when the first word of `line` is a statement keyword. "Selected" is not "SELECT".
fn starts_with_sql_keyword(line: &str) -> bool {
    let first_word = line
        .trim_start()
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .next()
        .unwrap_or_default();
    SQL_KEYWORDS
        .iter()
        .any(|kw| first_word.eq_ignore_ascii_case(kw))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that answers from a fixed script.
    pub(crate) struct StubBackend {
        pub reply: Result<String, TranslationError>,
        pub delay: Option<Duration>,
        pub calls: AtomicUsize,
    }

    impl StubBackend {
        pub(crate) fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                delay: None,
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn failing(err: TranslationError) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(err),
                delay: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SqlBackend for StubBackend {
        async fn complete(&self, _prompt: &str) -> Result<String, TranslationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.reply.clone()
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    #[test]
    fn replaces_every_double_quote() {
        let sql = normalize_sql(r#"SELECT "name" FROM users WHERE city = "Oslo""#).unwrap();
        assert!(!sql.contains('"'));
        assert_eq!(sql, "SELECT 'name' FROM users WHERE city = 'Oslo'");
    }

    #[test]
    fn whitespace_only_is_empty_response() {
        assert_eq!(normalize_sql("  \n\t "), Err(TranslationError::EmptyResponse));
        assert_eq!(normalize_sql("```sql\n```"), Err(TranslationError::EmptyResponse));
    }

    #[test]
    fn strips_code_fences_and_prose() {
        let fenced = "Here you go:\n```sql\nSELECT * FROM users;\n```\nEnjoy";
        assert_eq!(normalize_sql(fenced).unwrap(), "SELECT * FROM users;");

        let bare = "```\nSELECT 1\n```";
        assert_eq!(normalize_sql(bare).unwrap(), "SELECT 1");

        let prose = "The query is:\nSELECT id\nFROM users";
        assert_eq!(normalize_sql(prose).unwrap(), "SELECT id\nFROM users");
    }

    #[tokio::test]
    async fn translate_uses_assisted_backend_for_model_assisted() {
        let primary = StubBackend::replying("SELECT 1");
        let assisted = StubBackend::replying("SELECT 2");
        let client = TranslationClient::new(primary.clone(), Duration::from_secs(5))
            .with_assisted(assisted.clone(), Duration::from_secs(5));

        let sql = client
            .translate("p", BackendRef::from(Strategy::ModelAssisted))
            .await
            .unwrap();
        assert_eq!(sql, "SELECT 2");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn assisted_falls_back_to_primary() {
        let primary = StubBackend::replying("SELECT 1");
        let client = TranslationClient::new(primary.clone(), Duration::from_secs(5));
        assert_eq!(client.translate("p", BackendRef::Assisted).await.unwrap(), "SELECT 1");
    }

    #[tokio::test]
    async fn backend_errors_pass_through() {
        let client = TranslationClient::new(
            StubBackend::failing(TranslationError::BackendUnavailable("down".into())),
            Duration::from_secs(5),
        );
        assert_eq!(
            client.translate("p", BackendRef::Primary).await,
            Err(TranslationError::BackendUnavailable("down".into()))
        );
    }

    #[tokio::test]
    async fn single_timeout_ends_attempt() {
        let slow = Arc::new(StubBackend {
            reply: Ok("SELECT 1".to_string()),
            delay: Some(Duration::from_secs(30)),
            calls: AtomicUsize::new(0),
        });
        let client = TranslationClient::new(slow.clone(), Duration::from_millis(50));

        let result = client.translate("p", BackendRef::Primary).await;
        assert_eq!(result, Err(TranslationError::Timeout(Duration::from_millis(50))));
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
    }

    fn slow_backend(delay: Duration) -> Arc<StubBackend> {
        Arc::new(StubBackend {
            reply: Ok("SELECT 1".to_string()),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn each_backend_keeps_its_own_timeout() {
        let primary = slow_backend(Duration::from_millis(200));
        let assisted = slow_backend(Duration::from_millis(200));
        let client = TranslationClient::new(primary, Duration::from_millis(20))
            .with_assisted(assisted, Duration::from_secs(5));

        assert_eq!(
            client.translate("p", BackendRef::Primary).await,
            Err(TranslationError::Timeout(Duration::from_millis(20)))
        );
        assert_eq!(client.translate("p", BackendRef::Assisted).await.unwrap(), "SELECT 1");
    }

    #[test]
    fn prose_line_starting_with_keyword_prefix_is_skipped() {
        let raw = "Selected rows are:\nSELECT id FROM users";
        assert_eq!(normalize_sql(raw).unwrap(), "SELECT id FROM users");

        let updates = "Updated query below\nUPDATE users SET active = true";
        assert_eq!(normalize_sql(updates).unwrap(), "UPDATE users SET active = true");
    }
}
