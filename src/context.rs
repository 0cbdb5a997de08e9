//! 会话上下文：模型端点句柄 + 工具注册表 + 对话历史 + system prompt
//!
//! - 模型句柄通过 Arc 共享，可被多个 Context 复用；Context 不对其加锁，端点实现需可重入
//! - 注册表与历史由 Context 独占；单写者使用，并发写需调用方自行同步
//! - chat / chat_with_tools 返回 Task，未 await 前不触碰历史；失败或 Task 在中途被丢弃（超时、select!）
//!   时历史回滚到调用前，不会留下悬空的 User 消息或没有回答的工具轮
//! - stream_chat 返回 ChatStream；序列完整结束或消费者调用 finalize 时写入 User 与 Assistant 两条消息，
//!   未定稿就丢弃或中途出错都不会留下截断的回复

use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;

use futures_util::{Stream, StreamExt};
use tracing::{debug, info};

use crate::core::{AgentError, AsyncGenerator, Task};
use crate::llm::{LlmClient, LlmResponse};
use crate::media::MediaEnvelope;
use crate::memory::{ConversationMemory, Message, Role};
use crate::tools::{Tool, ToolDescriptor, ToolPayload, ToolRegistry, ToolResult};

/// 工具调用轮数上限默认值
pub const DEFAULT_MAX_TOOL_DEPTH: usize = 5;

/// 调用该工具且成功时，其结果即为最终回答
const RESPOND_TOOL: &str = "respond";

/// 一轮对话的历史守卫：begin 时记下位置并写入 User 消息，未 commit 就被丢弃时截回该位置
struct PendingTurn<'a> {
    ctx: &'a mut Context,
    mark: usize,
    committed: bool,
}

impl<'a> PendingTurn<'a> {
    fn begin(ctx: &'a mut Context, user: Message) -> Self {
        let mark = ctx.history.len();
        ctx.history.push(user);
        Self {
            ctx,
            mark,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Deref for PendingTurn<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx
    }
}

impl DerefMut for PendingTurn<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx
    }
}

impl Drop for PendingTurn<'_> {
    fn drop(&mut self) {
        if !self.committed {
            debug!(mark = self.mark, "turn abandoned, rolling back history");
            self.ctx.history.truncate(self.mark);
        }
    }
}

/// stream_chat 的结果：逐块产出文本，序列结束或 finalize 时把本轮写入历史
#[must_use = "streams do nothing unless polled"]
pub struct ChatStream<'a> {
    chunks: AsyncGenerator<'a, Result<String, AgentError>>,
    history: &'a mut ConversationMemory,
    /// 写入历史后为 None
    user: Option<Message>,
    received: String,
    failure: Option<AgentError>,
}

impl ChatStream<'_> {
    fn commit(&mut self) {
        if self.failure.is_some() {
            return;
        }
        if let Some(user) = self.user.take() {
            self.history.push(user);
            self.history.push(Message::assistant(self.received.clone()));
        }
    }

    /// 消费者提前定稿：停止拉取模型输出，把已收到的文本作为本轮回复写入历史并返回。
    /// 流已出错时返回该错误，历史不变。
    pub fn finalize(mut self) -> Result<String, AgentError> {
        self.chunks.close();
        if let Some(e) = self.failure.take() {
            return Err(e);
        }
        self.commit();
        Ok(std::mem::take(&mut self.received))
    }

    /// 已收到的文本
    pub fn received(&self) -> &str {
        &self.received
    }
}

impl Stream for ChatStream<'_> {
    type Item = Result<String, AgentError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.chunks.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.received.push_str(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.failure = Some(e.clone());
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.commit();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct Context {
    llm: Arc<dyn LlmClient>,
    registry: ToolRegistry,
    history: ConversationMemory,
    system_prompt: String,
    max_tool_depth: usize,
}

impl Context {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            registry: ToolRegistry::new(),
            history: ConversationMemory::new(),
            system_prompt: String::new(),
            max_tool_depth: DEFAULT_MAX_TOOL_DEPTH,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_tool_depth(mut self, depth: usize) -> Self {
        self.max_tool_depth = depth;
        self
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn set_llm(&mut self, llm: Arc<dyn LlmClient>) {
        self.llm = llm;
    }

    pub fn llm(&self) -> Arc<dyn LlmClient> {
        self.llm.clone()
    }

    pub fn max_tool_depth(&self) -> usize {
        self.max_tool_depth
    }

    // ---- 工具 ----

    pub fn register_tool(&mut self, tool: impl Tool + 'static) -> Result<(), AgentError> {
        self.registry.register(tool)
    }

    /// 合并整个注册表；有重名则不做任何修改
    pub fn register_registry(&mut self, other: &ToolRegistry) -> Result<(), AgentError> {
        self.registry.merge(other)
    }

    pub fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.lookup(name)
    }

    pub fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        self.registry.descriptors()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 直接调度一个工具（不写历史）
    pub fn execute_tool(&self, name: &str, params: serde_json::Value) -> Task<'static, ToolResult> {
        self.registry.dispatch(name, params)
    }

    // ---- 历史 ----

    pub fn add_message(&mut self, msg: Message) {
        self.history.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        self.history.messages()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// 用户消息：文本片段在前，媒体片段按给定顺序在后
    pub fn user_message(text: &str, media: Vec<MediaEnvelope>) -> Message {
        let mut parts = Vec::with_capacity(media.len() + 1);
        if !text.is_empty() || media.is_empty() {
            parts.push(MediaEnvelope::text(text));
        }
        parts.extend(media);
        Message::new(Role::User, parts)
    }

    /// 把附件字符串（URI、data URL 或信封 JSON）转成信封；任何一个无法识别都整体失败
    pub fn parse_media(items: &[&str]) -> Result<Vec<MediaEnvelope>, AgentError> {
        items
            .iter()
            .map(|s| {
                MediaEnvelope::from_uri_or_data(s)
                    .ok_or_else(|| AgentError::InvalidEnvelope(format!("unrecognized media reference: {s}")))
            })
            .collect()
    }

    /// system prompt + 完整历史
    fn request_messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.history.len() + 1);
        if !self.system_prompt.is_empty() {
            out.push(Message::system(self.system_prompt.clone()));
        }
        out.extend(self.history.messages().iter().cloned());
        out
    }

    // ---- 模型调用 ----

    /// 普通对话：追加 User 消息，调用模型，追加 Assistant 回复
    pub fn chat(&mut self, text: &str, media: Vec<MediaEnvelope>) -> Task<'_, Result<LlmResponse, AgentError>> {
        let user = Self::user_message(text, media);
        Task::new(async move {
            let mut turn = PendingTurn::begin(self, user);
            debug!(history = turn.history.len(), "chat");
            let request = turn.request_messages();
            let resp = turn.llm.chat(&request).await?;
            turn.history.push(Message::assistant(resp.content.clone()));
            turn.commit();
            Ok(resp)
        })
    }

    /// 带工具的对话：模型请求工具 -> 调度 -> 结果以 Tool 消息回填 -> 再次调用模型，
    /// 直到得到不含工具调用的回复；超过 max_tool_depth 轮返回 ToolLoopExceeded
    pub fn chat_with_tools(
        &mut self,
        text: &str,
        media: Vec<MediaEnvelope>,
    ) -> Task<'_, Result<LlmResponse, AgentError>> {
        let user = Self::user_message(text, media);
        Task::new(async move {
            let mut turn = PendingTurn::begin(self, user);
            let resp = turn.tool_loop().await?;
            turn.commit();
            Ok(resp)
        })
    }

    async fn tool_loop(&mut self) -> Result<LlmResponse, AgentError> {
        let mut rounds = 0usize;
        loop {
            let request = self.request_messages();
            let descriptors = self.registry.descriptors();
            let resp = self.llm.chat_with_tools(&request, &descriptors).await?;

            if !resp.has_tool_calls() {
                self.history.push(Message::assistant(resp.content.clone()));
                return Ok(resp);
            }
            if rounds >= self.max_tool_depth {
                return Err(AgentError::ToolLoopExceeded {
                    limit: self.max_tool_depth,
                });
            }

            self.history
                .push(Message::assistant(resp.content.clone()).with_tool_calls(resp.tool_calls.clone()));

            let mut final_answer: Option<ToolResult> = None;
            for call in &resp.tool_calls {
                info!(tool = %call.name, round = rounds + 1, "tool call");
                let result = self.registry.dispatch(&call.name, call.arguments.clone()).await;
                self.history
                    .push(Message::tool(call.name.clone(), call.id.clone(), result.to_parts()));
                if call.name == RESPOND_TOOL && result.success {
                    final_answer = Some(result);
                }
            }
            rounds += 1;

            if let Some(answer) = final_answer {
                let mut parts = answer.to_parts();
                // respond 带附件时载荷为 {text, media}，首段换成回答文本本身
                if let ToolPayload::Data(v) = &answer.payload {
                    if let Some(text) = v.get("text").and_then(serde_json::Value::as_str) {
                        parts[0] = MediaEnvelope::text(text);
                    }
                }
                let content = Message::new(Role::Assistant, parts.clone()).text();
                self.history.push(Message::new(Role::Assistant, parts));
                return Ok(LlmResponse {
                    content,
                    tool_calls: Vec::new(),
                    usage: resp.usage,
                });
            }
        }
    }

    /// 流式对话：逐块产出文本；序列完整结束（或 finalize）后才把 User 与 Assistant 消息写入历史
    pub fn stream_chat(&mut self, text: &str, media: Vec<MediaEnvelope>) -> ChatStream<'_> {
        let user = Self::user_message(text, media);
        let llm = self.llm.clone();
        let mut request = self.request_messages();
        request.push(user.clone());

        let chunks = AsyncGenerator::new(move |y| async move {
            let mut stream = match llm.stream_chat(&request).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = y.yield_item(Err(e.into())).await;
                    return;
                }
            };
            while let Some(chunk) = stream.next().await {
                let failed = chunk.is_err();
                if y.yield_item(chunk.map_err(AgentError::from)).await.is_err() {
                    debug!("stream abandoned by consumer, history untouched");
                    return;
                }
                if failed {
                    return;
                }
            }
        });

        ChatStream {
            chunks,
            history: &mut self.history,
            user: Some(user),
            received: String::new(),
            failure: None,
        }
    }

    /// 一次性调用：给定 system 与 prompt，不读写历史（供工作流与工具使用）
    pub fn complete_oneshot(&self, system: &str, prompt: &str) -> Task<'_, Result<String, AgentError>> {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));
        Task::new(async move {
            let resp = self.llm.chat(&messages).await?;
            Ok(resp.content)
        })
    }
}
