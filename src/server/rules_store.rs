//! 磁盘规则文件
//!
//! 持有最近一次成功加载的规则图及由它构建的 SafeValues。notify 监听规则文件所在目录，
//! 事件静默一段时间后重新加载，并在广播通道上发布 `{"type":"rules_updated","version":n}`。
//! 新文件无效时保留旧规则图。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify::{recommended_watcher, EventKind, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::rules::{RuleGraph, RuleGraphError, SafeValues};

/// 一次成功加载的结果
#[derive(Debug)]
pub struct LoadedRules {
    pub graph: Arc<RuleGraph>,
    pub safe: SafeValues,
    /// 原始 JSON，GET /api/rules 原样返回
    pub raw: serde_json::Value,
    pub version: u64,
    modified: Option<SystemTime>,
}

pub struct RulesStore {
    path: PathBuf,
    delay_key: String,
    first_rule: String,
    current: RwLock<Arc<LoadedRules>>,
    events: broadcast::Sender<String>,
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn load(path: &Path, delay_key: &str, first_rule: &str, version: u64) -> Result<LoadedRules, RuleGraphError> {
    let modified = modified_at(path);
    let text = std::fs::read_to_string(path)?;
    let graph = RuleGraph::parse_validated(&text, delay_key, first_rule)?;
    let raw: serde_json::Value = serde_json::from_str(&text)?;
    Ok(LoadedRules {
        safe: SafeValues::from_graph(&graph),
        graph: Arc::new(graph),
        raw,
        version,
        modified,
    })
}

impl RulesStore {
    /// 首次加载失败视为致命错误
    pub fn open(
        path: impl Into<PathBuf>,
        delay_key: impl Into<String>,
        first_rule: impl Into<String>,
    ) -> Result<Self, RuleGraphError> {
        let path = path.into();
        let delay_key = delay_key.into();
        let first_rule = first_rule.into();
        let loaded = load(&path, &delay_key, &first_rule, 1)?;
        tracing::info!(path = %path.display(), rules = loaded.graph.len(), "Rules loaded");
        let (events, _) = broadcast::channel(16);
        Ok(Self {
            path,
            delay_key,
            first_rule,
            current: RwLock::new(Arc::new(loaded)),
            events,
        })
    }

    pub async fn current(&self) -> Arc<LoadedRules> {
        self.current.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    /// 文件 mtime 变化时重新加载；返回是否发生了替换
    pub async fn refresh(&self) -> Result<bool, RuleGraphError> {
        if modified_at(&self.path) == self.current.read().await.modified {
            return Ok(false);
        }
        let mut current = self.current.write().await;
        // 等写锁期间可能已有其他请求完成了加载
        if modified_at(&self.path) == current.modified {
            return Ok(false);
        }
        self.replace(&mut current).map(|_| true)
    }

    /// 强制重新加载，返回新版本号
    pub async fn reload(&self) -> Result<u64, RuleGraphError> {
        let mut current = self.current.write().await;
        self.replace(&mut current)
    }

    fn replace(&self, current: &mut Arc<LoadedRules>) -> Result<u64, RuleGraphError> {
        let version = current.version + 1;
        let loaded = match load(&self.path, &self.delay_key, &self.first_rule, version) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Keeping previous rules: {}", e);
                return Err(e);
            }
        };
        tracing::info!(version, rules = loaded.graph.len(), "Rules reloaded");
        *current = Arc::new(loaded);

        let event = serde_json::json!({ "type": "rules_updated", "version": version });
        let _ = self.events.send(event.to_string());
        Ok(version)
    }

    fn touches_rules_file(&self, event: &notify::Event) -> bool {
        !matches!(event.kind, EventKind::Access(_))
            && event
                .paths
                .iter()
                .any(|p| p.file_name() == self.path.file_name())
    }

    /// 监听规则文件变化：事件静默 `debounce` 后重新加载
    pub fn spawn_watcher(
        self: Arc<Self>,
        debounce: Duration,
        cancel: CancellationToken,
    ) -> notify::Result<()> {
        let (tx, mut rx) = mpsc::channel::<notify::Result<notify::Event>>(100);
        let mut watcher = recommended_watcher(move |event| {
            // 回调运行在 notify 自己的线程
            let _ = tx.blocking_send(event);
        })?;
        // 编辑器常用改名方式替换文件，因此监听所在目录
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        tracing::debug!(dir = %dir.display(), "Watching rules directory");

        tokio::spawn(async move {
            let _watcher = watcher;
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => event,
                };
                match event {
                    None => break,
                    Some(Ok(event)) if self.touches_rules_file(&event) => {}
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!("Rules watcher error: {}", e);
                        continue;
                    }
                }

                tracing::debug!("Rules file changed, waiting for writes to settle");
                loop {
                    match tokio::time::timeout(debounce, rx.recv()).await {
                        Ok(Some(_)) => continue,
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }
                // 失败时 replace 已记录告警并保留旧规则
                let _ = self.reload().await;
            }
            tracing::debug!("Rules watcher stopped");
        });
        Ok(())
    }
}
