use crate::dashboard::to_csv_bytes;
use crate::dataset::column_names;
use crate::error::{DashboardError, Result};
use crate::llm::TextGenerator;
use polars::prelude::DataFrame;
use std::time::Duration;
use tracing::info;

const SAMPLE_ROWS: usize = 5;

/// Question prompt: columns, a short CSV sample of the view, the question.
pub fn build_question_prompt(view: &DataFrame, question: &str) -> Result<String> {
    let sample = to_csv_bytes(&view.head(Some(SAMPLE_ROWS)))?;
    let sample = String::from_utf8_lossy(&sample);
    Ok(format!(
        r#"You are an intelligent data analyst working with this filtered dataset:
Columns: {}

Here is a sample of the data:
{}
The user asks:
"{}"

Please provide a clear, concise response based only on the above data."#,
        column_names(view).join(", "),
        sample,
        question.trim()
    ))
}

/// Single-shot question answering over the current view.
pub async fn ask<G>(generator: &G, view: &DataFrame, question: &str, timeout: Duration) -> Result<String>
where
    G: TextGenerator + ?Sized,
{
    if question.trim().is_empty() {
        return Err(DashboardError::EmptyRequest);
    }
    let prompt = build_question_prompt(view, question)?;
    info!("Asking about {} rows", view.height());

    match tokio::time::timeout(timeout, generator.generate(&prompt)).await {
        Ok(Ok(answer)) => Ok(answer.trim().to_string()),
        Ok(Err(DashboardError::Generation(message))) => Err(DashboardError::Generation(message)),
        Ok(Err(other)) => Err(DashboardError::Generation(other.to_string())),
        Err(_) => Err(DashboardError::Generation(format!(
            "no response within {}s",
            timeout.as_secs_f64()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use polars::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Reply {
        Answer(&'static str),
        Fail(fn() -> DashboardError),
        Stall(Duration),
    }

    struct FixedGenerator {
        reply: Reply,
        calls: AtomicUsize,
    }

    impl FixedGenerator {
        fn new(reply: Reply) -> Self {
            Self {
                reply,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Reply::Answer(text) => Ok(text.to_string()),
                Reply::Fail(make) => Err(make()),
                Reply::Stall(delay) => {
                    tokio::time::sleep(*delay).await;
                    Ok("too late".to_string())
                }
            }
        }
    }

    fn view() -> DataFrame {
        df! [
            "Region" => ["North", "South"],
            "TotalSales" => [100, 200],
        ]
        .unwrap()
    }

    #[tokio::test]
    async fn test_ask_returns_trimmed_answer() {
        let generator = FixedGenerator::new(Reply::Answer("  South sells most.\n"));
        let answer = ask(&generator, &view(), "Which region sells most?", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(answer, "South sells most.");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ask_blank_question_is_not_sent() {
        let generator = FixedGenerator::new(Reply::Answer("unused"));
        let err = ask(&generator, &view(), "  \t ", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, DashboardError::EmptyRequest));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ask_maps_service_errors_to_generation() {
        let generator = FixedGenerator::new(Reply::Fail(|| DashboardError::Config("bad key".to_string())));
        match ask(&generator, &view(), "Which region?", Duration::from_secs(5)).await {
            Err(DashboardError::Generation(message)) => assert!(message.contains("bad key")),
            other => panic!("expected generation error, got {:?}", other),
        }

        let generator = FixedGenerator::new(Reply::Fail(|| DashboardError::Generation("quota".to_string())));
        match ask(&generator, &view(), "Which region?", Duration::from_secs(5)).await {
            Err(DashboardError::Generation(message)) => assert_eq!(message, "quota"),
            other => panic!("expected generation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ask_times_out() {
        let generator = FixedGenerator::new(Reply::Stall(Duration::from_secs(2)));
        let err = ask(&generator, &view(), "Which region?", Duration::from_millis(50))
            .await
            .unwrap_err();
        match err {
            DashboardError::Generation(message) => assert!(message.contains("no response within")),
            other => panic!("expected generation error, got {:?}", other),
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_question_prompt_has_sample() {
        let view = df! [
            "Region" => ["North", "South", "East", "West", "North", "South"],
            "TotalSales" => [1, 2, 3, 4, 5, 6],
        ]
        .unwrap();
        let prompt = build_question_prompt(&view, "  Which region sells most? ").unwrap();
        assert!(prompt.contains("Columns: Region, TotalSales"));
        assert!(prompt.contains("Region,TotalSales\nNorth,1\n"));
        assert!(prompt.contains("West,4\nNorth,5\n"));
        assert!(!prompt.contains("South,6"));
        assert!(prompt.contains("\"Which region sells most?\""));
    }
}
