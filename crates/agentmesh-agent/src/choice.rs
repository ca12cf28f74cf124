//! Response choice: the single output channel of a turn.
//!
//! The reasoning loop reports each capability invocation as a stage and the
//! final answer as content. A choice either just records these (buffered
//! responses) or also forwards them as [`ChoiceEvent`]s (streaming).

use tokio::sync::mpsc;
use tracing::debug;

/// One completed capability invocation, for UI visibility.
#[derive(Clone, Debug, PartialEq)]
pub struct Stage {
    pub capability: String,
    /// Raw JSON arguments the model supplied.
    pub arguments: String,
    pub result: String,
    pub failed: bool,
}

/// Event emitted on a streaming choice.
#[derive(Clone, Debug, PartialEq)]
pub enum ChoiceEvent {
    Stage(Stage),
    Content(String),
    Failure { message: String, code: &'static str },
}

/// Output of one turn.
#[derive(Debug, Default)]
pub struct ResponseChoice {
    stages: Vec<Stage>,
    content: String,
    events: Option<mpsc::UnboundedSender<ChoiceEvent>>,
}

impl ResponseChoice {
    /// A buffered choice.
    pub fn new() -> Self {
        Self::default()
    }

    /// A choice that also forwards every event to the returned receiver.
    pub fn streaming() -> (Self, mpsc::UnboundedReceiver<ChoiceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let choice = Self {
            events: Some(tx),
            ..Self::default()
        };
        (choice, rx)
    }

    pub fn add_stage(&mut self, stage: Stage) {
        self.emit(ChoiceEvent::Stage(stage.clone()));
        self.stages.push(stage);
    }

    pub fn append_content(&mut self, text: &str) {
        self.content.push_str(text);
        self.emit(ChoiceEvent::Content(text.to_string()));
    }

    pub fn fail(&mut self, message: &str, code: &'static str) {
        self.emit(ChoiceEvent::Failure {
            message: message.to_string(),
            code,
        });
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    fn emit(&mut self, event: ChoiceEvent) {
        if let Some(tx) = &self.events {
            // Receiver gone: the caller stopped listening. The owner of the
            // turn is responsible for cancelling it; keep recording meanwhile.
            if tx.send(event).is_err() {
                debug!("response choice receiver dropped");
                self.events = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str) -> Stage {
        Stage {
            capability: name.into(),
            arguments: "{}".into(),
            result: "ok".into(),
            failed: false,
        }
    }

    #[test]
    fn test_buffered_choice_records() {
        let mut choice = ResponseChoice::new();
        choice.add_stage(stage("search"));
        choice.append_content("Hello ");
        choice.append_content("world");
        assert_eq!(choice.content(), "Hello world");
        assert_eq!(choice.stages().len(), 1);
    }

    #[tokio::test]
    async fn test_streaming_choice_forwards_events() {
        let (mut choice, mut rx) = ResponseChoice::streaming();
        choice.add_stage(stage("search"));
        choice.append_content("done");
        drop(choice);

        assert_eq!(rx.recv().await, Some(ChoiceEvent::Stage(stage("search"))));
        assert_eq!(rx.recv().await, Some(ChoiceEvent::Content("done".into())));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_dropped_receiver_does_not_break_choice() {
        let (mut choice, rx) = ResponseChoice::streaming();
        drop(rx);
        choice.append_content("still recorded");
        assert_eq!(choice.content(), "still recorded");
    }
}
