use sizer_core::UserId;
use sizer_db::repositories::{SqlUserRepository, UserRepository};

use crate::commands::{block_on, exit, load_config, open_database, CommandResult};

/// Admins receive alerts about bans and payments. Banned admins are skipped at send time.
pub fn run(user_id: i64, grant: bool) -> CommandResult {
    let config = match load_config("admin") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = match block_on("admin", async {
        let pool = open_database(&config).await?;
        let users = SqlUserRepository::new(pool.clone());
        users
            .set_admin(UserId(user_id), grant)
            .await
            .map_err(|error| ("db_query", error.to_string(), exit::DATABASE))?;
        let admins = users
            .list_admins()
            .await
            .map_err(|error| ("db_query", error.to_string(), exit::DATABASE))?;
        pool.close().await;
        Ok::<usize, (&'static str, String, u8)>(admins.len())
    }) {
        Ok(result) => result,
        Err(failure) => return failure,
    };

    let verb = if grant { "granted to" } else { "revoked from" };
    match result {
        Ok(active) => CommandResult::success(
            "admin",
            format!("admin alerts {verb} user {user_id} ({active} active admin(s))"),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("admin", error_class, message, exit_code)
        }
    }
}
