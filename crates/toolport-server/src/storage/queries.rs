//! Machine and tool queries.

use toolport_core::db::unix_timestamp;

use super::db::{DatabaseError, PortalDatabase};
use super::models::{Machine, Tool};

/// Fields for registering a tool in the dispatch projection.
#[derive(Debug, Clone)]
pub struct NewTool<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub tool_type: &'a str,
    pub target: Option<&'a str>,
    pub run_config: Option<&'a str>,
    pub execution_mode: &'a str,
}

impl PortalDatabase {
    // =========================================================================
    // Machine queries
    // =========================================================================

    /// Register a machine. Only the hash of its key is stored.
    pub async fn create_machine(
        &self,
        id: &str,
        name: &str,
        key_hash: &str,
    ) -> Result<Machine, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO machines (id, name, key_hash, enabled, created_at) VALUES (?, ?, ?, 1, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(key_hash)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_machine(id).await
    }

    pub async fn get_machine(&self, id: &str) -> Result<Machine, DatabaseError> {
        sqlx::query_as::<_, Machine>("SELECT * FROM machines WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Machine {id}")))
    }

    /// Look up a machine by the hash of its key, enabled or not.
    pub async fn get_machine_by_key_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<Machine>, DatabaseError> {
        let machine = sqlx::query_as::<_, Machine>("SELECT * FROM machines WHERE key_hash = ?")
            .bind(key_hash)
            .fetch_optional(self.pool())
            .await?;

        Ok(machine)
    }

    pub async fn list_machines(&self) -> Result<Vec<Machine>, DatabaseError> {
        let machines = sqlx::query_as::<_, Machine>("SELECT * FROM machines ORDER BY name, id")
            .fetch_all(self.pool())
            .await?;

        Ok(machines)
    }

    pub async fn set_machine_enabled(&self, id: &str, enabled: bool) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE machines SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Overwrite the single-slot command mailbox.
    pub async fn set_pending_command(&self, id: &str, command: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE machines SET pending_command = ? WHERE id = ?")
            .bind(command)
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_pending_command(&self, id: &str) -> Result<Option<String>, DatabaseError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT pending_command FROM machines WHERE id = ?")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;

        match row {
            Some((command,)) => Ok(command),
            None => Err(DatabaseError::NotFound(format!("Machine {id}"))),
        }
    }

    /// Refresh liveness and empty the mailbox, but only if it still holds
    /// `expected`. Returns `false` when another writer changed the mailbox
    /// in between.
    pub async fn touch_and_clear_command(
        &self,
        id: &str,
        hostname: Option<&str>,
        expected: Option<&str>,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE machines SET last_seen_at = ?, hostname = COALESCE(?, hostname), pending_command = NULL
             WHERE id = ? AND pending_command IS ?",
        )
        .bind(now)
        .bind(hostname)
        .bind(id)
        .bind(expected)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Tool queries
    // =========================================================================

    pub async fn create_tool(&self, tool: &NewTool<'_>) -> Result<Tool, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO tools (id, name, tool_type, target, run_config, execution_mode, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(tool.id)
        .bind(tool.name)
        .bind(tool.tool_type)
        .bind(tool.target)
        .bind(tool.run_config)
        .bind(tool.execution_mode)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_tool(tool.id).await
    }

    pub async fn get_tool(&self, id: &str) -> Result<Tool, DatabaseError> {
        sqlx::query_as::<_, Tool>("SELECT * FROM tools WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Tool {id}")))
    }

    pub async fn set_tool_archived(&self, id: &str, archived: bool) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE tools SET is_archived = ? WHERE id = ?")
            .bind(archived)
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
