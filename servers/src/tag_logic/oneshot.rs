use anyhow::{Context, Result};
use lib_ctapi::core::SessionFactory;
use lib_ctapi::{DirectSession, Endpoint, TagValue};

use crate::tag_logic::config::Command;

/// Runs one command on a direct session and returns what to print.
pub async fn run<F: SessionFactory>(factory: &F, endpoint: &Endpoint, command: &Command) -> Result<String> {
    let mut session = DirectSession::open(factory, endpoint)
        .await
        .with_context(|| format!("Failed to open a session on {}", endpoint.host))?;

    let outcome = execute(&mut session, command).await;
    session.close().await;
    outcome
}

async fn execute<S: lib_ctapi::core::Session>(session: &mut DirectSession<S>, command: &Command) -> Result<String> {
    match command {
        Command::Read { tag } => {
            let value = session.read_tag(tag).await.with_context(|| format!("Failed to read {}", tag))?;
            Ok(value.to_string())
        }
        Command::Write { tag, value } => {
            let value = TagValue::parse(value);
            session
                .write_tag(tag, &value)
                .await
                .with_context(|| format!("Failed to write {}", tag))?;
            Ok(format!("{} = {}", tag, value))
        }
        Command::Call { expression } => {
            let result = session
                .call_function(expression)
                .await
                .with_context(|| format!("Failed to call {}", expression))?;
            Ok(result.to_string())
        }
        Command::Search { query } => {
            let rows = session
                .search(query)
                .await
                .with_context(|| format!("Failed to search {}", query))?;
            Ok(serde_json::to_string_pretty(&rows)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_ctapi::simulator::SimulatedHost;

    fn endpoint() -> Endpoint {
        Endpoint::new("sim", "engineer", "control")
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let host = SimulatedHost::new();
        host.define_tag("SP1", TagValue::Integer(0));

        let written = run(&host, &endpoint(), &Command::Write { tag: "SP1".into(), value: "12.5".into() })
            .await
            .unwrap();
        assert_eq!(written, "SP1 = 12.5");

        let read = run(&host, &endpoint(), &Command::Read { tag: "SP1".into() }).await.unwrap();
        assert_eq!(read, "12.5");
        assert_eq!(host.sessions_closed(), 2);
    }

    #[tokio::test]
    async fn test_errors_still_close_the_session() {
        let host = SimulatedHost::new();
        let err = run(&host, &endpoint(), &Command::Read { tag: "Missing".into() }).await.unwrap_err();
        assert!(err.to_string().contains("Missing"));
        assert_eq!(host.sessions_closed(), 1);
    }
}
