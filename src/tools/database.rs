//! 用户库工具：内存 SQLite 演示数据
//!
//! 每次调用都新建内存库并写入 user1..user4，工具本身无共享状态。

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::ToolOutput;
use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::Tool;

const DUMMY_USERS: [(&str, &str, &str, i64, &str); 4] = [
    ("user1", "Alice Johnson", "alice@example.com", 28, "New York"),
    ("user2", "Bob Smith", "bob@example.com", 35, "San Francisco"),
    ("user3", "Carol Davis", "carol@example.com", 42, "Chicago"),
    ("user4", "David Wilson", "david@example.com", 31, "Austin"),
];

/// fetch_user_from_database 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct FetchUserArgs {
    /// The ID of the user to fetch (e.g. "user1")
    pub user_id: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub age: i64,
    pub city: String,
}

pub struct UserDatabaseTool;

impl UserDatabaseTool {
    fn open() -> rusqlite::Result<Connection> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE users (
                id TEXT PRIMARY KEY,
                name TEXT,
                email TEXT,
                age INTEGER,
                city TEXT
            );",
        )?;
        {
            let mut stmt = conn.prepare("INSERT INTO users VALUES (?1, ?2, ?3, ?4, ?5)")?;
            for (id, name, email, age, city) in DUMMY_USERS {
                stmt.execute(params![id, name, email, age, city])?;
            }
        }
        Ok(conn)
    }

    pub fn fetch(user_id: &str) -> rusqlite::Result<Option<UserRecord>> {
        let conn = Self::open()?;
        conn.query_row(
            "SELECT id, name, email, age, city FROM users WHERE id = ?1",
            params![user_id],
            |row| {
                Ok(UserRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                    age: row.get(3)?,
                    city: row.get(4)?,
                })
            },
        )
        .optional()
    }
}

#[async_trait]
impl Tool for UserDatabaseTool {
    fn name(&self) -> &str {
        "fetch_user_from_database"
    }

    fn description(&self) -> &str {
        "Fetch user information (name, email, age, city) from the user database by user ID."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<FetchUserArgs>()
    }

    fn examples(&self) -> Vec<String> {
        vec![
            "fetch user1 from database".to_string(),
            "get user info for user2".to_string(),
        ]
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, String> {
        let args: FetchUserArgs = parse_args(args)?;
        let user_id = args.user_id.trim().to_string();
        let lookup = user_id.clone();
        let found = tokio::task::spawn_blocking(move || UserDatabaseTool::fetch(&lookup))
            .await
            .map_err(|e| format!("database task failed: {e}"))?;

        let text = match found {
            Ok(Some(user)) => {
                let json = serde_json::to_string_pretty(&user).map_err(|e| e.to_string())?;
                format!("User found: {json}")
            }
            Ok(None) => {
                let ids: Vec<&str> = DUMMY_USERS.iter().map(|u| u.0).collect();
                format!(
                    "User with ID '{user_id}' not found. Available IDs: {}",
                    ids.join(", ")
                )
            }
            Err(e) => format!("Error fetching user '{user_id}': {e}"),
        };
        Ok(ToolOutput::text(text))
    }
}
