//! Post-call review: a sales coach grades the transcript and writes an
//! education plan for the trainee.

use crate::api_types::{ChatMessage, TurnRequest};
use crate::transport::ConversationTransport;
use pitchdrill_core::ServiceCallError;
use std::sync::Arc;
use std::time::Duration;

const COACH_SYSTEM_PROMPT: &str = "You are an expert sales coach analyzing a conversation between a sales representative and a small business owner discussing financing options. Provide a detailed analysis of the call and create an education plan for the sales representative.";

const PLAN_MARKER: &str = "Education Plan:";

pub const DEFAULT_COACH_MODEL: &str = "gpt-4";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoachReport {
    pub analysis: String,
    /// Starts with `Education Plan:`. Empty when the coach did not write one.
    pub education_plan: String,
}

impl CoachReport {
    /// Split the coach's answer at the first `Education Plan:` marker.
    pub fn parse(answer: &str) -> Self {
        match answer.split_once(PLAN_MARKER) {
            Some((analysis, plan)) => Self {
                analysis: analysis.trim().to_string(),
                education_plan: format!("{} {}", PLAN_MARKER, plan.trim()),
            },
            None => Self {
                analysis: answer.trim().to_string(),
                education_plan: String::new(),
            },
        }
    }
}

pub struct CallCoach {
    transport: Arc<dyn ConversationTransport>,
    model: String,
    timeout: Duration,
}

impl CallCoach {
    pub fn new(transport: Arc<dyn ConversationTransport>, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn review(&self, transcript: &str) -> Result<CoachReport, ServiceCallError> {
        let request = TurnRequest {
            instructions: COACH_SYSTEM_PROMPT.to_string(),
            messages: vec![ChatMessage::user(review_request(transcript))],
            model: self.model.clone(),
            temperature: 0.7,
            max_tokens: 2000,
            voice: None,
        };

        tracing::info!("Requesting call review ({} chars of transcript)", transcript.len());
        let response = tokio::time::timeout(self.timeout, self.transport.send_turn(request))
            .await
            .unwrap_or(Err(ServiceCallError::Timeout(self.timeout)))?;
        Ok(CoachReport::parse(&response.text))
    }
}

fn review_request(transcript: &str) -> String {
    format!(
        "Please analyze this sales call transcript and provide:\n\
         1. A detailed analysis of the call, including scores for different aspects (opening, needs assessment, product knowledge, etc.)\n\
         2. An overall score out of 10\n\
         3. Key strengths and areas for improvement\n\
         4. A comprehensive education plan for the sales representative\n\n\
         Here's the transcript:\n\n{}",
        transcript
    )
}
