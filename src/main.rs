//! shotline - 单图多风格批量出片
//!
//! 入口：初始化日志、加载配置、创建后端 / 存储 / 编排器，并按子命令驱动一次运行。

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;

use shotline::backend::{create_backends_from_config, AspectRatio};
use shotline::catalog::{Style, SubjectMode};
use shotline::config::{load_config, AppConfig};
use shotline::core::{create_orchestrator, Batch, ImageData, OrchestratorEvent, ProjectId};
use shotline::observability;
use shotline::store::create_store_from_config;

#[derive(Parser, Debug)]
#[command(name = "shotline", about = "Turn one image into a catalog of styled shots")]
struct Args {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// 分析源图并生成整个风格目录
    Generate {
        image: PathBuf,
        #[arg(long)]
        mode: Option<SubjectMode>,
        #[arg(long)]
        aspect: Option<AspectRatio>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// 用新指令重新生成已保存项目中的一张
    Edit {
        project_id: String,
        style: String,
        instruction: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// 以原指令重试已保存项目中的一张
    Retry {
        project_id: String,
        style: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// 列出已保存的项目（新到旧）
    History,
    Delete { project_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let args = Args::parse();

    // 显式指定的配置文件加载失败直接报错；默认配置失败则退回内置默认值
    let cfg = match load_config(args.config.clone()) {
        Ok(cfg) => cfg,
        Err(e) if args.config.is_some() => {
            return Err(e).context("Failed to load config");
        }
        Err(e) => {
            tracing::warn!("Config load failed ({}), using defaults", e);
            AppConfig::default()
        }
    };

    let (backend, analyzer) = create_backends_from_config(&cfg);
    let store = create_store_from_config(&cfg);
    let (handle, _state_rx, mut events) = create_orchestrator(&cfg, backend, analyzer, store);

    match args.cmd {
        Cmd::Generate {
            image,
            mode,
            aspect,
            out,
        } => {
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("Failed to read {}", image.display()))?;
            let source = ImageData::new(ImageData::mime_for_path(&image), bytes);

            let (project_id, subject) = handle.select_source(source).await?;
            println!(
                "Project {project_id}: {} ({}, confidence {:.2})",
                subject.name, subject.category, subject.confidence
            );
            if let Some(mode) = mode {
                handle.set_mode(mode).await?;
            }
            if let Some(ratio) = aspect {
                handle.set_aspect_ratio(ratio).await?;
            }
            handle.generate_all().await?;

            let batch = wait_for(&mut events, |event| match event {
                OrchestratorEvent::TaskUpdated { style, batch } => {
                    let p = batch.progress();
                    if let Some(task) = batch.task(style) {
                        println!("[{}/{}] {} {}", p.completed(), p.total, style, task.status.label());
                    }
                    None
                }
                OrchestratorEvent::TaskRetryScheduled {
                    style,
                    attempt,
                    delay_ms,
                } => {
                    println!("  {style} rate limited (attempt {attempt}), retrying in {delay_ms} ms");
                    None
                }
                OrchestratorEvent::BatchCompleted { batch } => Some(batch.clone()),
                _ => None,
            })
            .await?;

            // 关闭前编排器会先完成快照写入（命令按序处理）
            handle.shutdown().await?;
            let dir = out.unwrap_or_else(|| cfg.app.output_dir.clone());
            let written = write_outputs(&dir, &batch, None)?;
            let p = batch.progress();
            println!(
                "Done: {} succeeded, {} failed, {} files in {}",
                p.succeeded,
                p.failed,
                written,
                dir.join(batch.project_id.as_str()).display()
            );
        }
        Cmd::Edit {
            project_id,
            style,
            instruction,
            out,
        } => {
            let style = Style::new(style);
            handle.load_project(ProjectId::from(project_id)).await?;
            handle.edit(style.clone(), instruction).await?;
            let batch = wait_for_edit(&mut events, &style).await?;
            handle.shutdown().await?;
            let dir = out.unwrap_or_else(|| cfg.app.output_dir.clone());
            write_outputs(&dir, &batch, Some(&style))?;
            println!("Edited {style}");
        }
        Cmd::Retry {
            project_id,
            style,
            out,
        } => {
            let style = Style::new(style);
            handle.load_project(ProjectId::from(project_id)).await?;
            handle.retry_task(style.clone()).await?;
            let batch = wait_for_edit(&mut events, &style).await?;
            handle.shutdown().await?;
            let dir = out.unwrap_or_else(|| cfg.app.output_dir.clone());
            write_outputs(&dir, &batch, Some(&style))?;
            println!("Regenerated {style}");
        }
        Cmd::History => {
            let history = handle.history().await?;
            if history.is_empty() {
                println!("No saved projects");
            }
            for snapshot in history {
                let p = snapshot.batch.progress();
                println!(
                    "{}  {}  {:<7}  {}  {}/{} succeeded",
                    snapshot.project_id(),
                    snapshot.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    snapshot.batch.mode,
                    snapshot.batch.aspect_ratio,
                    p.succeeded,
                    p.total
                );
            }
            handle.shutdown().await?;
        }
        Cmd::Delete { project_id } => {
            let id = ProjectId::from(project_id);
            handle.delete_project(id.clone()).await?;
            println!("Deleted {id}");
            handle.shutdown().await?;
        }
    }

    Ok(())
}

/// 消费事件直到 pick 返回 Some；落后的订阅者跳过丢失的事件
async fn wait_for<T>(
    events: &mut broadcast::Receiver<OrchestratorEvent>,
    mut pick: impl FnMut(&OrchestratorEvent) -> Option<T>,
) -> anyhow::Result<T> {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(found) = pick(&event) {
                    return Ok(found);
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => bail!("Orchestrator stopped unexpectedly"),
        }
    }
}

async fn wait_for_edit(
    events: &mut broadcast::Receiver<OrchestratorEvent>,
    target: &Style,
) -> anyhow::Result<Batch> {
    let outcome = wait_for(events, |event| match event {
        OrchestratorEvent::EditCompleted { style, batch } if style == target => {
            Some(Ok(batch.clone()))
        }
        OrchestratorEvent::EditFailed { style, reason } if style == target => {
            Some(Err(reason.clone()))
        }
        _ => None,
    })
    .await?;
    outcome.map_err(|reason| anyhow::anyhow!("Edit of {target} failed: {reason}"))
}

/// 把成功任务的输出写到 <dir>/<projectId>/<STYLE>.<ext>，返回写入的文件数
fn write_outputs(dir: &Path, batch: &Batch, only: Option<&Style>) -> anyhow::Result<usize> {
    let project_dir = dir.join(batch.project_id.as_str());
    std::fs::create_dir_all(&project_dir)
        .with_context(|| format!("Failed to create {}", project_dir.display()))?;

    let mut written = 0;
    for task in batch.ordered_tasks() {
        if only.is_some_and(|s| s != &task.style) {
            continue;
        }
        let Some(output) = task.output() else {
            continue;
        };
        let path = project_dir.join(format!("{}.{}", task.style, output.extension()));
        std::fs::write(&path, &output.data)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        written += 1;
    }
    Ok(written)
}
