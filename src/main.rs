#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use mediaflow::config::CONFIG;
use mediaflow::utils::logger;
use mediaflow::{build_context, default_processors, init_env};

#[tokio::main]
async fn main() -> Result<()> {
    init_env();

    // 初始化日志系统
    let _guard = logger::init(CONFIG.log_dir.to_string_lossy().into_owned())?;

    info!("Starting mediaflow {}...", env!("GIT_HASH"));

    // 初始化任务管理器
    info!("Initializing Job Manager...");
    let ctx = Arc::new(build_context(&CONFIG, default_processors(&CONFIG)).await?);

    // 恢复上次未执行的任务
    let resumed = ctx.job_manager.resume_queued().await?;
    info!("Resumed {} queued jobs", resumed);

    // 配置服务器地址
    let addr: SocketAddr = CONFIG
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid MEDIAFLOW_BIND_ADDR: {}", CONFIG.bind_addr))?;
    info!("Starting HTTP server at http://{}", addr);

    // 启动 HTTP 服务器
    match mediaflow::web::start_server(ctx.clone(), addr).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            tracing::error!("Server error: {}", e);
            return Err(e);
        }
    }

    // 优雅关闭
    info!("Shutting down...");
    ctx.job_manager.shutdown(CONFIG.kill_grace + Duration::from_secs(5)).await;

    Ok(())
}
