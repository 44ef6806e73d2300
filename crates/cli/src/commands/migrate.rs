use crate::commands::{open_migrated, prepare, CommandResult};
use helpline_db::migrations;

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("migrate") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        let applied = migrations::applied_count(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<i64, (&'static str, String, u8)>(applied)
    });

    match result {
        Ok(applied) => CommandResult::success(
            "migrate",
            format!("applied pending migrations ({applied} total)"),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
