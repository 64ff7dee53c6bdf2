use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use regex::{Captures, Regex};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ModelSettings;
use crate::rows::Row;

/// A hosted text-generation model.
pub trait TextModel {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// OpenAI-compatible `/chat/completions` client.
pub struct ChatModel {
    http: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatModel {
    pub fn new(settings: &ModelSettings) -> Result<ChatModel> {
        Ok(ChatModel {
            http: Client::builder()
                .timeout(Duration::from_secs(settings.request_timeout_secs))
                .build()?,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            model: settings.name.clone(),
            api_key: settings
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok()),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        })
    }
}

impl TextModel for ChatModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut req = self
            .http
            .post(format!("{}/chat/completions", self.endpoint))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let t0 = Instant::now();
        let resp = req.send().await.context("model request failed")?;
        let status = resp.status();
        debug!(status = status.as_u16(), elapsed_ms = t0.elapsed().as_millis() as u64, "model response");
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            bail!("model returned HTTP {}: {}", status.as_u16(), snippet);
        }

        let parsed: ChatResponse = resp.json().await.context("model response is not valid JSON")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow!("model response has no content"))
    }
}

/// `19120405` -> `1912-04-05`. Anything else has no calendar date.
pub fn reformat_date(raw: &str) -> Option<String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y%m%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(\w+)\}").unwrap())
}

/// Replace each `{column}` in the template with the row's value (empty for NULL).
/// Single pass: inserted values are never scanned for placeholders. Names the
/// row lacks are left as written.
pub fn render_prompt(template: &str, row: &Row) -> String {
    placeholder_re()
        .replace_all(template, |caps: &Captures| match row.get(&caps[1]) {
            Some(v) => v.clone().unwrap_or_default(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

pub struct SummaryRow {
    pub row: Row,
    pub summary: String,
}

/// One model call per row, in order. The first failure aborts the pass.
pub async fn summarize_rows<M: TextModel>(
    model: &M,
    rows: Vec<Row>,
    template: &str,
    date_column: &str,
) -> Result<Vec<SummaryRow>> {
    let pb = ProgressBar::new(rows.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut out = Vec::with_capacity(rows.len());
    for (i, mut row) in rows.into_iter().enumerate() {
        if let Some(value) = row.get_mut(date_column) {
            *value = value.as_deref().and_then(reformat_date);
        }
        let prompt = render_prompt(template, &row);
        let summary = model
            .generate(&prompt)
            .await
            .with_context(|| format!("summarizing row {}", i))?;
        out.push(SummaryRow { row, summary });
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(rows = out.len(), "summarization finished");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StubModel {
        prompts: Mutex<Vec<String>>,
        fail_on: Option<usize>,
    }

    impl StubModel {
        fn new(fail_on: Option<usize>) -> StubModel {
            StubModel {
                prompts: Mutex::new(Vec::new()),
                fail_on,
            }
        }
    }

    impl TextModel for StubModel {
        async fn generate(&self, prompt: &str) -> Result<String> {
            let mut prompts = self.prompts.lock().unwrap();
            if Some(prompts.len()) == self.fail_on {
                bail!("quota exceeded");
            }
            prompts.push(prompt.to_string());
            Ok(format!("summary {}", prompts.len()))
        }
    }

    fn row(pairs: &[(&str, Option<&str>)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    fn settings(endpoint: &str) -> ModelSettings {
        ModelSettings {
            endpoint: endpoint.to_string(),
            name: "test-model".into(),
            api_key: Some("sk-test".into()),
            max_tokens: 100,
            temperature: 0.7,
            request_timeout_secs: 5,
            prompt_template: "{ocr_eng}".into(),
            columns: vec!["ocr_eng".into()],
            date_column: "date".into(),
        }
    }

    #[test]
    fn compact_date_to_calendar_date() {
        assert_eq!(reformat_date("19120405").as_deref(), Some("1912-04-05"));
        assert_eq!(reformat_date(" 18651231 ").as_deref(), Some("1865-12-31"));
        assert_eq!(reformat_date("19121345"), None);
        assert_eq!(reformat_date("1912-04-05"), None);
        assert_eq!(reformat_date(""), None);
    }

    #[test]
    fn prompt_fills_columns() {
        let r = row(&[("title", Some("The Sun")), ("date", Some("1912-04-05")), ("ocr_eng", None)]);
        let p = render_prompt("{title} ({date}): {ocr_eng}|{missing}", &r);
        assert_eq!(p, "The Sun (1912-04-05): |{missing}");
    }

    #[test]
    fn inserted_values_are_not_rescanned() {
        let r = row(&[("ocr_eng", Some("see {title} here")), ("title", Some("The Sun"))]);
        assert_eq!(render_prompt("{ocr_eng}", &r), "see {title} here");
        assert_eq!(render_prompt("{title}: {ocr_eng}", &r), "The Sun: see {title} here");
    }

    #[tokio::test]
    async fn stalled_model_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"choices": [{"message": {"content": "late"}}]}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let mut s = settings(&server.uri());
        s.request_timeout_secs = 1;
        let model = ChatModel::new(&s).unwrap();
        let err = model.generate("x").await.unwrap_err();
        assert!(format!("{:#}", err).contains("model request failed"));
    }

    #[tokio::test]
    async fn one_call_per_row_with_reformatted_date() {
        let model = StubModel::new(None);
        let rows = vec![
            row(&[("date", Some("19120405")), ("ocr_eng", Some("River rises"))]),
            row(&[("date", Some("19120406")), ("ocr_eng", Some("Bridge closed"))]),
            row(&[("date", Some("garbled")), ("ocr_eng", Some("Rain"))]),
        ];
        let out = summarize_rows(&model, rows, "{date}: {ocr_eng}", "date").await.unwrap();

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].row["date"].as_deref(), Some("1912-04-05"));
        assert_eq!(out[2].row["date"], None);
        assert_eq!(out[1].summary, "summary 2");
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts[0], "1912-04-05: River rises");
        assert_eq!(prompts[2], ": Rain");
    }

    #[tokio::test]
    async fn model_failure_aborts_pass() {
        let model = StubModel::new(Some(1));
        let rows = vec![
            row(&[("ocr_eng", Some("a"))]),
            row(&[("ocr_eng", Some("b"))]),
            row(&[("ocr_eng", Some("c"))]),
        ];
        let err = summarize_rows(&model, rows, "{ocr_eng}", "date")
            .await
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("quota exceeded"));
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chat_model_sends_generation_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "test-model",
                "max_tokens": 100,
                "temperature": 0.7,
                "messages": [{"role": "user", "content": "Summarize this"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "  A flood.  "}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let model = ChatModel::new(&settings(&format!("{}/v1/", server.uri()))).unwrap();
        assert_eq!(model.generate("Summarize this").await.unwrap(), "A flood.");
    }

    #[tokio::test]
    async fn chat_model_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let model = ChatModel::new(&settings(&server.uri())).unwrap();
        let err = model.generate("x").await.unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn chat_model_empty_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let model = ChatModel::new(&settings(&server.uri())).unwrap();
        assert!(model.generate("x").await.is_err());
    }
}
