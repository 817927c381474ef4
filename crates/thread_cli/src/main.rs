//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `thread_core` linkage without any UI shell.
//! - Run one mention cycle check against an in-memory database.

use std::process::ExitCode;
use thread_core::db::{open_db_in_memory, share};
use thread_core::{NoteService, NoteServiceError, SqliteNoteRepository};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    println!("thread_core ping={}", thread_core::ping());
    println!("thread_core version={}", thread_core::core_version());

    match cycle_probe().await {
        Ok(verdict) => {
            println!("thread_core cycle_probe={verdict}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("thread_core cycle_probe failed: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Builds `first -> second` and tries to close it with `second -> first`.
async fn cycle_probe() -> Result<&'static str, Box<dyn std::error::Error>> {
    let conn = share(open_db_in_memory()?);
    let service = NoteService::new(SqliteNoteRepository::try_new(conn)?);

    let second = service.create_note("second").await?;
    let first = service
        .create_note(format!("first, see [[note:{}]]", second.id))
        .await?;

    match service.add_mention(&second.id, &first.id).await {
        Err(NoteServiceError::CircularReference { .. }) => Ok("rejected"),
        Ok(_) => Ok("accepted"),
        Err(err) => Err(err.into()),
    }
}
