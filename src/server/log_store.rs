//! SQLite 会话日志表
//!
//! 每次日志一行：(uuid, sequence JSON, ip, action, result, timestamp, user_agent)。
//! 同一逻辑会话暂停 / 继续 / 重试时会产生多行。

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid table name: {0}")]
    InvalidTable(String),
    #[error("log store lock poisoned")]
    Lock,
    #[error("could not create database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// 一条待写入的日志
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    pub uuid: String,
    /// 序列化后的评估序列
    pub sequence: String,
    pub ip: String,
    pub action: String,
    pub result: String,
    pub timestamp: String,
    pub user_agent: String,
}

pub struct LogStore {
    connection: Mutex<Connection>,
    table: String,
}

impl LogStore {
    pub fn open(path: &Path, table: &str) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?, table)
    }

    pub fn open_in_memory(table: &str) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, table)
    }

    fn init(conn: Connection, table: &str) -> Result<Self, StoreError> {
        // 表名拼进 SQL，只允许标识符字符
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StoreError::InvalidTable(table.to_string()));
        }
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (id INTEGER PRIMARY KEY AUTOINCREMENT, \
             uuid TEXT NOT NULL, sequence TEXT NOT NULL, ip TEXT NOT NULL, action TEXT NOT NULL, \
             result TEXT NOT NULL, timestamp TEXT NOT NULL, user_agent TEXT NOT NULL);\
             CREATE INDEX IF NOT EXISTS idx_{table}_uuid ON {table}(uuid);"
        ))?;
        Ok(Self {
            connection: Mutex::new(conn),
            table: table.to_string(),
        })
    }

    pub fn insert(&self, row: &LogRow) -> Result<(), StoreError> {
        let conn = self.connection.lock().map_err(|_| StoreError::Lock)?;
        conn.execute(
            &format!(
                "INSERT INTO {} (uuid, sequence, ip, action, result, timestamp, user_agent) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                self.table
            ),
            params![
                row.uuid,
                row.sequence,
                row.ip,
                row.action,
                row.result,
                row.timestamp,
                row.user_agent,
            ],
        )?;
        Ok(())
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.connection.lock().map_err(|_| StoreError::Lock)?;
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
            row.get(0)
        })?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// 某个会话标识的全部日志，按写入顺序
    pub fn rows_for(&self, uuid: &str) -> Result<Vec<LogRow>, StoreError> {
        let conn = self.connection.lock().map_err(|_| StoreError::Lock)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT uuid, sequence, ip, action, result, timestamp, user_agent FROM {} \
             WHERE uuid = ?1 ORDER BY id",
            self.table
        ))?;
        let rows = stmt
            .query_map(params![uuid], |row| {
                Ok(LogRow {
                    uuid: row.get(0)?,
                    sequence: row.get(1)?,
                    ip: row.get(2)?,
                    action: row.get(3)?,
                    result: row.get(4)?,
                    timestamp: row.get(5)?,
                    user_agent: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
