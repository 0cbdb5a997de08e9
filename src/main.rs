//! Hive 命令行入口
//!
//! 逐行读取标准输入：普通文本走带工具对话；
//! `/stream <text>` 流式输出，`/media <uri>[|<uri>...] <text>` 附带媒体（URI 或 data URL）对话，
//! `/eval <task>` 运行评估-优化工作流，`/clear` 清空历史，`/quit` 退出。

use std::io::Write;

use anyhow::Context as _;
use futures_util::StreamExt;
use hive::agent::{build_context, process_message, process_message_with_media};
use hive::config::load_config;
use hive::workflow::EvaluatorWorkflow;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let mut ctx = build_context(&cfg).context("Failed to build context")?;
    let evaluator = EvaluatorWorkflow::from_config(&cfg.workflow.evaluator);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("stdin read failed")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/clear", _) => {
                ctx.clear_history();
                println!("(history cleared)");
            }
            ("/eval", task) => match evaluator.run(&ctx, task).await {
                Ok(result) => println!("{}", serde_json::to_string_pretty(&result.to_value())?),
                Err(e) => error!(error = %e, "evaluator workflow failed"),
            },
            ("/media", rest) => {
                let (refs, text) = rest.trim().split_once(' ').unwrap_or((rest.trim(), ""));
                match process_message_with_media(&mut ctx, text, refs).await {
                    Ok(reply) => println!("{}", reply),
                    Err(e) => error!(error = %e, "media chat failed"),
                }
            }
            ("/stream", text) => {
                let mut stream = ctx.stream_chat(text, Vec::new());
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(piece) => {
                            print!("{}", piece);
                            std::io::stdout().flush()?;
                        }
                        Err(e) => {
                            error!(error = %e, "stream failed");
                            break;
                        }
                    }
                }
                println!();
            }
            _ => match process_message(&mut ctx, line).await {
                Ok(reply) => println!("{}", reply),
                Err(e) => error!(error = %e, "chat failed"),
            },
        }
    }
    Ok(())
}
