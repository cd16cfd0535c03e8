//! One-shot expression evaluation

use crate::gdb::dispatcher::Dispatcher;
use crate::gdb::error::EvaluateError;
use crate::gdb::host::Notifier;
use crate::gdb::parser::parse_print_value;
use crate::gdb::types::{Evaluation, Severity};
use crate::gdb::validate::{validate_input, InputKind};
use std::sync::Arc;
use tracing::debug;

/// Resolves expressions to display values. Holds no state between calls.
#[derive(Clone)]
pub struct EvaluateSession {
    dispatcher: Dispatcher,
    notifier: Arc<dyn Notifier>,
}

impl EvaluateSession {
    pub fn new(dispatcher: Dispatcher, notifier: Arc<dyn Notifier>) -> Self {
        Self { dispatcher, notifier }
    }

    pub async fn evaluate(&self, expr: &str) -> Result<Evaluation, EvaluateError> {
        let checked = validate_input(InputKind::Expression.as_str(), expr);
        let expression = match (checked.valid, checked.normalized) {
            (true, Some(expression)) => expression,
            _ => {
                let error = EvaluateError::Validation(checked.error.unwrap_or_default());
                self.notifier.notify(&error.to_string(), Severity::Warn);
                return Err(error);
            }
        };
        if let Some(hint) = &checked.hint {
            self.notifier.notify(hint, Severity::Info);
        }

        let lines = match self.dispatcher.request(format!("print {}", expression), None).await {
            Ok(lines) => lines,
            Err(e) => {
                self.notifier.notify(&format!("{}: {}", expression, e), Severity::Error);
                return Err(e.into());
            }
        };

        let (history_index, value) = parse_print_value(&lines);
        debug!("Evaluated {} -> {}", expression, value);
        Ok(Evaluation {
            expression,
            value,
            history_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdb::error::DispatchError;
    use crate::gdb::session::ChannelSession;
    use crate::gdb::testing::{fake_gdb, test_config, RecordingNotifier};
    use tokio_test::{assert_err, assert_ok};

    fn evaluator(running: bool) -> (EvaluateSession, RecordingNotifier, std::sync::Arc<std::sync::Mutex<Vec<String>>>) {
        let (session, peer) = ChannelSession::pair();
        peer.set_running(running);
        let log = fake_gdb(peer, |cmd| match cmd {
            "print counter" => "$1 = 42\n".to_string(),
            "print p->next" => "$2 = (struct node *) 0x0\n".to_string(),
            "print point" => "$3 = {\n  x = 1,\n  y = 2\n}\n".to_string(),
            _ => "No symbol \"missing\" in current context.\n".to_string(),
        });
        let notes = RecordingNotifier::default();
        let session = EvaluateSession::new(Dispatcher::spawn(session, &test_config()), Arc::new(notes.clone()));
        (session, notes, log)
    }

    #[tokio::test]
    async fn test_evaluate_value() {
        let (session, notes, _) = evaluator(true);
        let result = assert_ok!(session.evaluate(" counter ").await);
        assert_eq!(result.expression, "counter");
        assert_eq!(result.value, "42");
        assert_eq!(result.history_index, Some(1));
        assert_eq!(notes.count(), 0);
    }

    #[tokio::test]
    async fn test_evaluate_multiline_value_and_hint() {
        let (session, notes, _) = evaluator(true);
        let result = assert_ok!(session.evaluate("point").await);
        assert!(result.value.starts_with('{'));
        assert!(result.value.contains("y = 2"));

        assert_ok!(session.evaluate("p->next").await);
        assert!(notes.contains("pointer dereference"));
    }

    #[tokio::test]
    async fn test_evaluate_debugger_error_is_verbatim() {
        let (session, notes, _) = evaluator(true);
        let err = assert_err!(session.evaluate("missing").await);
        assert_eq!(
            err,
            EvaluateError::Dispatch(DispatchError::Debugger(
                "No symbol \"missing\" in current context.".to_string()
            ))
        );
        assert!(notes.contains("No symbol"));
    }

    #[tokio::test]
    async fn test_evaluate_rejects_before_sending() {
        let (session, notes, log) = evaluator(true);
        assert!(matches!(
            session.evaluate("(a + b").await,
            Err(EvaluateError::Validation(_))
        ));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(notes.count(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_not_running() {
        let (session, _, log) = evaluator(false);
        let err = assert_err!(session.evaluate("counter").await);
        assert_eq!(err, EvaluateError::Dispatch(DispatchError::NotRunning));
        assert!(log.lock().unwrap().is_empty());
    }
}
