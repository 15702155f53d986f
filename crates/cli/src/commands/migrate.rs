use sizer_db::migrations::MIGRATOR;

use crate::commands::{block_on, load_config, open_database, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("migrate") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = match block_on("migrate", async {
        let pool = open_database(&config).await?;
        pool.close().await;
        Ok::<(), (&'static str, String, u8)>(())
    }) {
        Ok(result) => result,
        Err(failure) => return failure,
    };

    match result {
        Ok(()) => CommandResult::success(
            "migrate",
            format!("database schema up to date ({} migrations known)", MIGRATOR.iter().count()),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
