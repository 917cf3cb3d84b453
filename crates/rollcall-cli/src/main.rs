//! `rollcall`: administration for the check-in store.
//!
//! Usage:
//!   rollcall enroll <identity> --name <display> --template face.json
//!   rollcall subject add <id> --name <name> --code <code>
//!   rollcall subject open <id>
//!   rollcall subject close <id>
//!   rollcall subject status <id> [--json]
//!   rollcall history <identity> [--subject <id>] [--json]

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_checkin::{AttendanceEvent, AttendanceStore, Config, SubjectRecord};
use rollcall_core::Embedding;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rollcall")]
#[command(author, version, about = "Attendance check-in administration", long_about = None)]
struct Cli {
    /// Database path (overrides ROLLCALL_DB_PATH and the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register an identity and store its face template
    Enroll {
        identity: String,

        /// Display name recorded on attendance events
        #[arg(long)]
        name: String,

        /// JSON file holding the 128-value face descriptor
        #[arg(long)]
        template: PathBuf,
    },

    /// Manage subjects and their attendance sessions
    Subject {
        #[command(subcommand)]
        action: SubjectCommand,
    },

    /// Show attendance history for an identity, newest first
    History {
        identity: String,

        /// Only events for this subject
        #[arg(long)]
        subject: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum SubjectCommand {
    /// Create or rename a subject
    Add {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        code: String,
    },
    /// Open the attendance session so check-ins are accepted
    Open { id: String },
    /// Close the attendance session
    Close { id: String },
    /// Show session state and attendance count
    Status {
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let store = AttendanceStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;

    match cli.command {
        Command::Enroll {
            identity,
            name,
            template,
        } => enroll(&store, &identity, &name, &template).await,
        Command::Subject { action } => subject(&store, action).await,
        Command::History {
            identity,
            subject,
            json,
        } => history(&store, &identity, subject.as_deref(), json).await,
    }
}

async fn enroll(store: &AttendanceStore, identity: &str, name: &str, path: &Path) -> Result<()> {
    let template = read_template(path)?;

    store.upsert_identity(identity, name).await?;
    if !store.set_face_template(identity, &template).await? {
        bail!("identity {identity} disappeared during enrolment");
    }

    tracing::info!(identity, "face template enrolled");
    println!("Enrolled {name} ({identity}).");
    Ok(())
}

async fn subject(store: &AttendanceStore, action: SubjectCommand) -> Result<()> {
    match action {
        SubjectCommand::Add { id, name, code } => {
            store.upsert_subject(&id, &name, &code).await?;
            println!("Subject {code} ({id}) saved. Attendance is closed until opened.");
        }
        SubjectCommand::Open { id } => set_open(store, &id, true).await?,
        SubjectCommand::Close { id } => set_open(store, &id, false).await?,
        SubjectCommand::Status { id, json } => {
            let Some(subject) = store.get_subject(&id).await? else {
                bail!("no such subject: {id}");
            };
            let count = store.count_attendance(&id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&subject_status(&subject, count))?);
                return Ok(());
            }
            let state = if subject.session_active { "open" } else { "closed" };
            println!("{} {} ({})", subject.code, subject.name, subject.id);
            println!("  session:    {state}");
            println!("  attendance: {count} record(s)");
        }
    }
    Ok(())
}

async fn set_open(store: &AttendanceStore, id: &str, active: bool) -> Result<()> {
    if !store.set_session_active(id, active).await? {
        bail!("no such subject: {id}");
    }
    let verb = if active { "opened" } else { "closed" };
    tracing::info!(subject = id, active, "attendance session toggled");
    println!("Attendance session for {id} {verb}.");
    Ok(())
}

async fn history(
    store: &AttendanceStore,
    identity: &str,
    subject: Option<&str>,
    json: bool,
) -> Result<()> {
    let events = store.list_attendance(identity, subject).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }
    if events.is_empty() {
        println!("No attendance recorded for {identity}.");
        return Ok(());
    }
    for event in &events {
        println!("{}", format_event(event));
    }
    Ok(())
}

fn subject_status(subject: &SubjectRecord, attendance: u64) -> serde_json::Value {
    serde_json::json!({
        "subject": subject,
        "attendance": attendance,
    })
}

fn format_event(event: &AttendanceEvent) -> String {
    format!(
        "{}  {:<12}  {}  {}",
        event.date,
        event.subject_id,
        event.timestamp.format("%H:%M:%S UTC"),
        event.display_name
    )
}

/// Read a face template from a JSON array of numbers.
fn read_template(path: &Path) -> Result<Embedding> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let template: Embedding = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of numbers", path.display()))?;
    template
        .validate()
        .with_context(|| format!("{} is not a valid face template", path.display()))?;
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rollcall_core::EMBEDDING_DIM;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("rollcall-{}-{name}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_history_with_global_db() {
        let cli = Cli::try_parse_from([
            "rollcall", "history", "stu-1", "--subject", "cs-301", "--json", "--db", "/tmp/r.db",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/r.db")));
        match cli.command {
            Command::History {
                identity,
                subject,
                json,
            } => {
                assert_eq!(identity, "stu-1");
                assert_eq!(subject.as_deref(), Some("cs-301"));
                assert!(json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_enroll_requires_template() {
        assert!(Cli::try_parse_from(["rollcall", "enroll", "stu-1", "--name", "Asha"]).is_err());
    }

    #[test]
    fn test_read_valid_template() {
        let values = vec![0.05f32; EMBEDDING_DIM];
        let path = temp_file("valid.json", &serde_json::to_string(&values).unwrap());
        let template = read_template(&path).unwrap();
        assert_eq!(template.values.len(), EMBEDDING_DIM);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_read_template_rejects_wrong_length() {
        let path = temp_file("short.json", "[0.1, 0.2, 0.3]");
        let err = read_template(&path).unwrap_err();
        assert!(err.to_string().contains("not a valid face template"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_read_template_rejects_non_numeric() {
        let path = temp_file("object.json", r#"{"descriptor": "abc"}"#);
        assert!(read_template(&path).is_err());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_parse_subject_status_json() {
        let cli =
            Cli::try_parse_from(["rollcall", "subject", "status", "cs-301", "--json"]).unwrap();
        match cli.command {
            Command::Subject {
                action: SubjectCommand::Status { id, json },
            } => {
                assert_eq!(id, "cs-301");
                assert!(json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_subject_status_json_shape() {
        let store = AttendanceStore::open(Path::new(":memory:")).await.unwrap();
        store.upsert_subject("cs-301", "Operating Systems", "CS301").await.unwrap();
        store.set_session_active("cs-301", true).await.unwrap();
        let subject = store.get_subject("cs-301").await.unwrap().unwrap();

        let value = subject_status(&subject, 3);
        assert_eq!(value["subject"]["id"], "cs-301");
        assert_eq!(value["subject"]["code"], "CS301");
        assert_eq!(value["subject"]["session_active"], true);
        assert_eq!(value["attendance"], 3);

        super::subject(&store, SubjectCommand::Status { id: "cs-301".into(), json: true })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_enroll_then_history_round_trip() {
        let store = AttendanceStore::open(Path::new(":memory:")).await.unwrap();
        let path = temp_file(
            "enroll.json",
            &serde_json::to_string(&vec![0.01f32; EMBEDDING_DIM]).unwrap(),
        );
        enroll(&store, "stu-1", "Asha Verma", &path).await.unwrap();
        std::fs::remove_file(path).ok();

        let identity = store.get_identity("stu-1").await.unwrap().unwrap();
        assert_eq!(identity.display_name, "Asha Verma");
        assert!(identity.face_template.is_some());

        assert!(set_open(&store, "missing", true).await.is_err());
        history(&store, "stu-1", None, false).await.unwrap();
    }
}
