use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.rollcall.Rollcall1",
    default_service = "org.rollcall.Rollcall1",
    default_path = "/org/rollcall/Rollcall1"
)]
trait Rollcall {
    fn status(&self) -> zbus::Result<String>;
    fn recognize(&self, caller: &str, session_id: i64, image: &str) -> zbus::Result<String>;
    fn open_session(&self, caller: &str, class_id: i64, date: &str) -> zbus::Result<String>;
    fn get_session(&self, caller: &str, session_id: i64) -> zbus::Result<String>;
    fn find_session(&self, caller: &str, class_id: i64, date: &str) -> zbus::Result<String>;
    fn end_session(&self, caller: &str, session_id: i64) -> zbus::Result<String>;
    fn list_sessions(&self, caller: &str, class_id: i64) -> zbus::Result<String>;
    fn records(&self, caller: &str, session_id: i64) -> zbus::Result<String>;
    fn delete_session(&self, caller: &str, session_id: i64) -> zbus::Result<String>;
    fn delete_all_sessions(&self, caller: &str, class_id: i64) -> zbus::Result<String>;
    fn delete_record(&self, caller: &str, record_id: i64) -> zbus::Result<String>;
    fn enroll_face(&self, caller: &str, image: &str, primary: bool) -> zbus::Result<String>;
    fn list_faces(&self, caller: &str) -> zbus::Result<String>;
    fn remove_face(&self, caller: &str, encoding_id: &str) -> zbus::Result<bool>;
    fn set_primary_face(&self, caller: &str, encoding_id: &str) -> zbus::Result<bool>;
    fn my_attendance(&self, caller: &str) -> zbus::Result<String>;
    fn my_classes(&self, caller: &str) -> zbus::Result<String>;
    fn add_teacher(
        &self,
        caller: &str,
        name: &str,
        employee_id: &str,
        department: &str,
    ) -> zbus::Result<String>;
    fn add_student(
        &self,
        caller: &str,
        name: &str,
        roll_number: &str,
        department: &str,
        semester: u32,
        batch: &str,
    ) -> zbus::Result<String>;
    fn list_students(&self, caller: &str) -> zbus::Result<String>;
    fn add_class(
        &self,
        caller: &str,
        course_name: &str,
        course_code: &str,
        section: &str,
        teacher_id: i64,
    ) -> zbus::Result<String>;
    fn enroll(&self, caller: &str, class_id: i64, student_id: i64) -> zbus::Result<bool>;
    fn unenroll(&self, caller: &str, class_id: i64, student_id: i64) -> zbus::Result<bool>;
    fn list_enrollments(&self, caller: &str, class_id: i64) -> zbus::Result<String>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Bus {
    System,
    Session,
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face-recognition attendance CLI")]
struct Cli {
    /// Who is asking: admin, teacher:<id> or student:<id>
    #[arg(long = "as", env = "ROLLCALL_CALLER", default_value = "admin", global = true)]
    caller: String,

    /// Message bus the daemon is registered on
    #[arg(long, env = "ROLLCALL_BUS", value_enum, default_value_t = Bus::System, global = true)]
    bus: Bus,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mark students present from a classroom photo
    Recognize {
        /// Attendance session ID
        session: i64,
        /// Photo file (JPEG, PNG, ...)
        image: PathBuf,
    },
    /// Attendance sessions
    #[command(subcommand)]
    Session(SessionCommand),
    /// Your reference face photos (students)
    #[command(subcommand)]
    Face(FaceCommand),
    /// Your attendance history (students)
    Attendance,
    /// Classes you teach (teachers)
    Classes,
    /// Teachers, students, classes and enrollments (admins)
    #[command(subcommand)]
    Roster(RosterCommand),
    /// Show daemon status
    Status,
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Open (or fetch) the session of a class for a date
    Open {
        class: i64,
        /// YYYY-MM-DD; defaults to today
        #[arg(long)]
        date: Option<String>,
    },
    /// Show one session with its counts
    Show { session: i64 },
    /// Look up the session of a class for a date
    Find {
        class: i64,
        /// YYYY-MM-DD; defaults to today
        #[arg(long)]
        date: Option<String>,
    },
    /// End a session; no further matches are accepted
    End { session: i64 },
    /// List the sessions of a class, newest first
    List { class: i64 },
    /// Show per-student outcomes of a session
    Records { session: i64 },
    /// Delete a session and its records
    Delete { session: i64 },
    /// Delete every session of a class
    DeleteAll { class: i64 },
    /// Delete a single attendance record
    DeleteRecord { record: i64 },
}

#[derive(Subcommand)]
enum FaceCommand {
    /// Add a reference photo showing only your face
    Enroll {
        image: PathBuf,
        /// Make this the primary encoding
        #[arg(long)]
        primary: bool,
    },
    /// List your stored encodings
    List,
    /// Remove a stored encoding
    Remove { id: String },
    /// Make a stored encoding primary
    Primary { id: String },
}

#[derive(Subcommand)]
enum RosterCommand {
    AddTeacher {
        #[arg(long)]
        name: String,
        #[arg(long)]
        employee_id: String,
        #[arg(long)]
        department: String,
    },
    AddStudent {
        #[arg(long)]
        name: String,
        #[arg(long)]
        roll_number: String,
        #[arg(long)]
        department: String,
        #[arg(long)]
        semester: u32,
        #[arg(long)]
        batch: String,
    },
    /// List all students
    Students,
    AddClass {
        #[arg(long)]
        course_name: String,
        #[arg(long)]
        course_code: String,
        #[arg(long)]
        section: String,
        #[arg(long)]
        teacher: i64,
    },
    Enroll { class: i64, student: i64 },
    Unenroll { class: i64, student: i64 },
    /// List students actively enrolled in a class
    List { class: i64 },
}

fn read_image(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(STANDARD.encode(bytes))
}

/// Pretty-print a JSON reply; anything else is printed as is.
fn render(reply: &str) -> String {
    serde_json::from_str::<serde_json::Value>(reply)
        .and_then(|value| serde_json::to_string_pretty(&value))
        .unwrap_or_else(|_| reply.to_string())
}

fn print_ok(done: bool) {
    println!("{}", if done { "ok" } else { "no change" });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = match cli.bus {
        Bus::System => zbus::Connection::system().await,
        Bus::Session => zbus::Connection::session().await,
    }
    .context("failed to connect to D-Bus")?;
    let proxy = RollcallProxy::new(&connection)
        .await
        .context("rollcalld is not reachable")?;
    tracing::debug!(caller = %cli.caller, bus = ?cli.bus, "connected");

    let caller = cli.caller.as_str();
    let reply = match cli.command {
        Commands::Recognize { session, image } => {
            let image = read_image(&image)?;
            proxy.recognize(caller, session, &image).await?
        }
        Commands::Session(cmd) => match cmd {
            SessionCommand::Open { class, date } => {
                proxy.open_session(caller, class, date.as_deref().unwrap_or("")).await?
            }
            SessionCommand::Show { session } => proxy.get_session(caller, session).await?,
            SessionCommand::Find { class, date } => {
                proxy.find_session(caller, class, date.as_deref().unwrap_or("")).await?
            }
            SessionCommand::End { session } => proxy.end_session(caller, session).await?,
            SessionCommand::List { class } => proxy.list_sessions(caller, class).await?,
            SessionCommand::Records { session } => proxy.records(caller, session).await?,
            SessionCommand::Delete { session } => proxy.delete_session(caller, session).await?,
            SessionCommand::DeleteAll { class } => proxy.delete_all_sessions(caller, class).await?,
            SessionCommand::DeleteRecord { record } => proxy.delete_record(caller, record).await?,
        },
        Commands::Face(cmd) => match cmd {
            FaceCommand::Enroll { image, primary } => {
                let image = read_image(&image)?;
                proxy.enroll_face(caller, &image, primary).await?
            }
            FaceCommand::List => proxy.list_faces(caller).await?,
            FaceCommand::Remove { id } => {
                print_ok(proxy.remove_face(caller, &id).await?);
                return Ok(());
            }
            FaceCommand::Primary { id } => {
                print_ok(proxy.set_primary_face(caller, &id).await?);
                return Ok(());
            }
        },
        Commands::Attendance => proxy.my_attendance(caller).await?,
        Commands::Classes => proxy.my_classes(caller).await?,
        Commands::Roster(cmd) => match cmd {
            RosterCommand::AddTeacher {
                name,
                employee_id,
                department,
            } => proxy.add_teacher(caller, &name, &employee_id, &department).await?,
            RosterCommand::AddStudent {
                name,
                roll_number,
                department,
                semester,
                batch,
            } => {
                proxy
                    .add_student(caller, &name, &roll_number, &department, semester, &batch)
                    .await?
            }
            RosterCommand::Students => proxy.list_students(caller).await?,
            RosterCommand::AddClass {
                course_name,
                course_code,
                section,
                teacher,
            } => {
                proxy
                    .add_class(caller, &course_name, &course_code, &section, teacher)
                    .await?
            }
            RosterCommand::Enroll { class, student } => {
                print_ok(proxy.enroll(caller, class, student).await?);
                return Ok(());
            }
            RosterCommand::Unenroll { class, student } => {
                print_ok(proxy.unenroll(caller, class, student).await?);
                return Ok(());
            }
            RosterCommand::List { class } => proxy.list_enrollments(caller, class).await?,
        },
        Commands::Status => proxy.status().await?,
    };

    println!("{}", render(&reply));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_caller_flag_is_global() {
        let cli = Cli::try_parse_from(["rollcall", "session", "open", "3", "--as", "teacher:7"]).unwrap();
        assert_eq!(cli.caller, "teacher:7");
        match cli.command {
            Commands::Session(SessionCommand::Open { class, date }) => {
                assert_eq!(class, 3);
                assert!(date.is_none());
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_render_pretty_prints_json() {
        assert_eq!(render(r#"{"a":1}"#), "{\n  \"a\": 1\n}");
        assert_eq!(render("plain"), "plain");
    }

    #[test]
    fn test_read_image_encodes_base64() {
        let path = std::env::temp_dir().join(format!("rollcall-cli-test-{}.bin", std::process::id()));
        std::fs::write(&path, b"hi").unwrap();
        assert_eq!(read_image(&path).unwrap(), "aGk=");
        std::fs::remove_file(&path).unwrap();
        assert!(read_image(&path).is_err());
    }
}
