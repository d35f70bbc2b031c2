use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::engine::InferenceEngine;
use crate::error::InferenceError;
use crate::prompt::refinement_prompt;
use crate::session::{Phase, RefinementSession, Stage};

/// 对用户只给统一的提示，不暴露具体错误
pub fn failure_message(model: &str) -> String {
    format!(
        "Error: Unable to connect to the inference backend. Please ensure it is running with the {} model.",
        model
    )
}

/// 提交结果（UI 层据此决定返回什么）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Started,
    /// prompt 去掉空白后为空：不建会话，不发请求
    EmptyPrompt,
    /// 已有会话在处理中（只有 `try_spawn_submit` 会返回）
    Busy,
}

/// 当前会话的只读快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub prompt: Option<String>,
    pub final_text: String,
    pub last_error: Option<InferenceError>,
}

impl SessionSnapshot {
    fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            prompt: None,
            final_text: String::new(),
            last_error: None,
        }
    }
}

/// 单槽位：同一时间只有一个会话，新提交整体替换旧会话
#[derive(Default)]
struct Slot {
    /// 每次替换会话都 +1，旧 epoch 的结果一律丢弃
    epoch: u64,
    session: Option<RefinementSession>,
    task: Option<AbortHandle>,
}

/// 两阶段流水线：原始 prompt -> 初次回答 -> 精炼 prompt -> 最终回答
pub struct Orchestrator {
    engine: Arc<dyn InferenceEngine>,
    model: String,
    slot: RwLock<Slot>,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn InferenceEngine>, model: &str) -> Arc<Self> {
        Arc::new(Self {
            engine,
            model: model.to_string(),
            slot: RwLock::new(Slot::default()),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn phase(&self) -> Phase {
        let guard = self.slot.read();
        guard
            .session
            .as_ref()
            .map(|s| s.phase())
            .unwrap_or(Phase::Idle)
    }

    pub fn is_busy(&self) -> bool {
        self.phase().is_in_flight()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let guard = self.slot.read();
        match &guard.session {
            Some(s) => SessionSnapshot {
                phase: s.phase(),
                prompt: Some(s.original_prompt().to_string()),
                final_text: s.final_text().to_string(),
                last_error: s.last_error().cloned(),
            },
            None => SessionSnapshot::idle(),
        }
    }

    /// 提交并等待流水线结束
    pub async fn submit(&self, raw_prompt: &str) -> SubmitOutcome {
        let begun = {
            let mut guard = self.slot.write();
            self.begin(&mut guard, raw_prompt, false)
        };
        match begun {
            Ok(epoch) => {
                self.run(epoch, raw_prompt.to_string()).await;
                SubmitOutcome::Started
            }
            Err(outcome) => outcome,
        }
    }

    /// 提交后立即返回，流水线在后台任务里跑；被替换的旧任务会被 abort
    pub fn spawn_submit(self: &Arc<Self>, raw_prompt: &str) -> SubmitOutcome {
        self.spawn_inner(raw_prompt, false)
    }

    /// 同 `spawn_submit`，但已有会话在处理中时拒绝
    pub fn try_spawn_submit(self: &Arc<Self>, raw_prompt: &str) -> SubmitOutcome {
        self.spawn_inner(raw_prompt, true)
    }

    fn spawn_inner(self: &Arc<Self>, raw_prompt: &str, reject_if_busy: bool) -> SubmitOutcome {
        // 建会话、启动任务、登记 AbortHandle 在同一把写锁内完成，
        // 下一次替换一定能 abort 到这个任务
        let mut guard = self.slot.write();
        let epoch = match self.begin(&mut guard, raw_prompt, reject_if_busy) {
            Ok(epoch) => epoch,
            Err(outcome) => return outcome,
        };

        let this = Arc::clone(self);
        let prompt = raw_prompt.to_string();
        let handle = tokio::spawn(async move { this.run(epoch, prompt).await });
        guard.task = Some(handle.abort_handle());
        SubmitOutcome::Started
    }

    /// 建新会话，替换旧的。返回新会话的 epoch
    fn begin(
        &self,
        guard: &mut Slot,
        raw_prompt: &str,
        reject_if_busy: bool,
    ) -> Result<u64, SubmitOutcome> {
        if raw_prompt.trim().is_empty() {
            debug!(target = "orchestrator", "empty prompt ignored");
            return Err(SubmitOutcome::EmptyPrompt);
        }

        let in_flight = guard
            .session
            .as_ref()
            .is_some_and(|s| s.phase().is_in_flight());
        if in_flight && reject_if_busy {
            info!(target = "orchestrator", "submission rejected: another one is in flight");
            return Err(SubmitOutcome::Busy);
        }

        if let Some(task) = guard.task.take() {
            task.abort();
        }
        guard.epoch += 1;
        guard.session = Some(RefinementSession::start(raw_prompt));

        info!(
            target = "orchestrator",
            epoch = guard.epoch,
            replaced_in_flight = in_flight,
            prompt_len = raw_prompt.len(),
            "submission accepted"
        );
        Ok(guard.epoch)
    }

    async fn run(&self, epoch: u64, prompt: String) {
        debug!(target = "orchestrator", epoch, "stage 1: initial call");
        let initial = match self.engine.infer(&self.model, &prompt).await {
            Ok(text) => text,
            Err(error) => {
                self.fail(epoch, Stage::Initial, error);
                return;
            }
        };

        // 会话已被替换就不再发第二次请求
        if !self.apply(epoch, |s| s.begin_refinement()) {
            return;
        }

        let refinement = refinement_prompt(&prompt, &initial);
        debug!(target = "orchestrator", epoch, "stage 2: refinement call");
        match self.engine.infer(&self.model, &refinement).await {
            Ok(text) => {
                let len = text.len();
                if self.apply(epoch, |s| s.settle_refined(text)) {
                    info!(target = "orchestrator", epoch, response_len = len, "session settled");
                }
            }
            Err(error) => self.fail(epoch, Stage::Refinement, error),
        }
    }

    fn fail(&self, epoch: u64, stage: Stage, error: InferenceError) {
        // 原始错误只进日志
        warn!(target = "orchestrator", epoch, ?stage, error = %error, "inference failed");
        self.apply(epoch, |s| s.settle_failed(stage, error));
    }

    /// 只有 epoch 仍是当前会话时才修改状态
    fn apply<F>(&self, epoch: u64, f: F) -> bool
    where
        F: FnOnce(&mut RefinementSession) -> bool,
    {
        let mut guard = self.slot.write();
        if guard.epoch != epoch {
            debug!(
                target = "orchestrator",
                stale = epoch,
                current = guard.epoch,
                "stale result discarded"
            );
            return false;
        }

        let Some(session) = guard.session.as_mut() else {
            return false;
        };
        let changed = f(session);
        if session.phase() == Phase::Settled {
            guard.task = None;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    /// 按顺序吐出预设结果，并记录每次收到的 prompt
    struct ScriptedEngine {
        replies: Mutex<VecDeque<Result<String, InferenceError>>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedEngine {
        fn new(replies: Vec<Result<String, InferenceError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(_, p)| p.clone()).collect()
        }
    }

    #[async_trait]
    impl InferenceEngine for ScriptedEngine {
        async fn infer(&self, model: &str, prompt: &str) -> Result<String, InferenceError> {
            self.calls.lock().push((model.to_string(), prompt.to_string()));
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(InferenceError::Transport("no scripted reply".into())))
        }
    }

    /// 每个 prompt 的回答由测试手动放行，用来制造乱序完成
    struct GatedEngine {
        gates: Mutex<HashMap<String, oneshot::Receiver<Result<String, InferenceError>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl GatedEngine {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gates: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn gate(&self, prompt: &str) -> oneshot::Sender<Result<String, InferenceError>> {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().insert(prompt.to_string(), rx);
            tx
        }

        /// 还没被 infer 取走的 gate
        fn pending(&self, prompt: &str) -> bool {
            self.gates.lock().contains_key(prompt)
        }

        fn called(&self, prompt: &str) -> bool {
            self.calls.lock().iter().any(|p| p == prompt)
        }

        async fn wait_for_call(&self, prompt: &str) {
            for _ in 0..1000 {
                if self.called(prompt) {
                    return;
                }
                tokio::task::yield_now().await;
            }
            panic!("engine never received prompt {prompt:?}");
        }
    }

    #[async_trait]
    impl InferenceEngine for GatedEngine {
        async fn infer(&self, _model: &str, prompt: &str) -> Result<String, InferenceError> {
            let rx = {
                self.calls.lock().push(prompt.to_string());
                self.gates.lock().remove(prompt)
            };
            match rx {
                Some(rx) => rx
                    .await
                    .unwrap_or_else(|_| Err(InferenceError::Transport("gate dropped".into()))),
                None => Err(InferenceError::Transport(format!("no gate for {prompt:?}"))),
            }
        }
    }

    async fn wait_for_phase(orch: &Orchestrator, phase: Phase) {
        for _ in 0..1000 {
            if orch.phase() == phase {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("phase never reached {phase:?}, still {:?}", orch.phase());
    }

    #[tokio::test]
    async fn two_calls_on_success_and_final_text_is_stage_two_answer() {
        let engine = ScriptedEngine::new(vec![Ok("4".into()), Ok("The answer is 4.".into())]);
        let orch = Orchestrator::new(engine.clone(), "phi3");

        assert_eq!(orch.submit("What is 2+2?").await, SubmitOutcome::Started);

        let prompts = engine.prompts();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0], "What is 2+2?");
        assert!(prompts[1].contains("What is 2+2?"));
        assert!(prompts[1].contains("4"));
        assert_eq!(prompts[1], refinement_prompt("What is 2+2?", "4"));
        assert!(engine.calls.lock().iter().all(|(m, _)| m == "phi3"));

        let snap = orch.snapshot();
        assert_eq!(snap.phase, Phase::Settled);
        assert_eq!(snap.final_text, "The answer is 4.");
        assert!(snap.last_error.is_none());
        assert_eq!(snap.prompt.as_deref(), Some("What is 2+2?"));
    }

    #[tokio::test]
    async fn stage_one_failure_skips_refinement() {
        let engine = ScriptedEngine::new(vec![Err(InferenceError::Transport(
            "connection refused".into(),
        ))]);
        let orch = Orchestrator::new(engine.clone(), "phi3");

        orch.submit("What is 2+2?").await;

        assert_eq!(engine.prompts().len(), 1);
        let snap = orch.snapshot();
        assert_eq!(snap.phase, Phase::Settled);
        assert_eq!(snap.final_text, "");
        assert_eq!(
            snap.last_error,
            Some(InferenceError::Transport("connection refused".into()))
        );
    }

    #[tokio::test]
    async fn stage_two_failure_discards_initial_answer() {
        let engine = ScriptedEngine::new(vec![
            Ok("4".into()),
            Err(InferenceError::HttpStatus(500)),
        ]);
        let orch = Orchestrator::new(engine.clone(), "phi3");

        orch.submit("What is 2+2?").await;

        assert_eq!(engine.prompts().len(), 2);
        let snap = orch.snapshot();
        assert_eq!(snap.phase, Phase::Settled);
        assert_eq!(snap.final_text, "");
        assert_eq!(snap.last_error, Some(InferenceError::HttpStatus(500)));
    }

    #[tokio::test]
    async fn blank_prompt_issues_no_calls_and_keeps_session() {
        let engine = ScriptedEngine::new(vec![Ok("a".into()), Ok("refined".into())]);
        let orch = Orchestrator::new(engine.clone(), "phi3");

        assert_eq!(orch.submit("   \n\t").await, SubmitOutcome::EmptyPrompt);
        assert_eq!(orch.submit("").await, SubmitOutcome::EmptyPrompt);
        assert!(engine.prompts().is_empty());
        assert_eq!(orch.snapshot(), SessionSnapshot::idle());

        orch.submit("q").await;
        let before = orch.snapshot();
        assert_eq!(orch.submit("  ").await, SubmitOutcome::EmptyPrompt);
        assert_eq!(orch.snapshot(), before);
        assert_eq!(engine.prompts().len(), 2);
    }

    #[tokio::test]
    async fn refinement_prompt_is_identical_across_submissions() {
        let engine = ScriptedEngine::new(vec![
            Ok("4".into()),
            Ok("x".into()),
            Ok("4".into()),
            Ok("y".into()),
        ]);
        let orch = Orchestrator::new(engine.clone(), "phi3");

        orch.submit("What is 2+2?").await;
        orch.submit("What is 2+2?").await;

        let prompts = engine.prompts();
        assert_eq!(prompts.len(), 4);
        assert_eq!(prompts[1].as_bytes(), prompts[3].as_bytes());
    }

    #[tokio::test]
    async fn late_stage_one_result_of_replaced_session_is_dropped() {
        let engine = GatedEngine::new();
        let orch = Orchestrator::new(engine.clone(), "phi3");

        let a1 = engine.gate("A");
        let b1 = engine.gate("B");
        let b2 = engine.gate(&refinement_prompt("B", "b1"));

        let first = tokio::spawn({
            let orch = orch.clone();
            async move { orch.submit("A").await }
        });
        engine.wait_for_call("A").await;

        let second = tokio::spawn({
            let orch = orch.clone();
            async move { orch.submit("B").await }
        });
        engine.wait_for_call("B").await;

        b1.send(Ok("b1".into())).unwrap();
        b2.send(Ok("B final".into())).unwrap();
        second.await.unwrap();
        assert_eq!(orch.snapshot().final_text, "B final");

        // A 的第一阶段这时才返回：不能推进状态，也不能发第二次请求
        a1.send(Ok("a1".into())).unwrap();
        first.await.unwrap();

        assert!(!engine.called(&refinement_prompt("A", "a1")));
        let snap = orch.snapshot();
        assert_eq!(snap.prompt.as_deref(), Some("B"));
        assert_eq!(snap.final_text, "B final");
        assert_eq!(snap.phase, Phase::Settled);
    }

    #[tokio::test]
    async fn late_stage_two_result_of_replaced_session_is_dropped() {
        let engine = GatedEngine::new();
        let orch = Orchestrator::new(engine.clone(), "phi3");

        let a1 = engine.gate("A");
        let a2 = engine.gate(&refinement_prompt("A", "a1"));
        let b1 = engine.gate("B");

        let first = tokio::spawn({
            let orch = orch.clone();
            async move { orch.submit("A").await }
        });
        engine.wait_for_call("A").await;
        a1.send(Ok("a1".into())).unwrap();
        engine.wait_for_call(&refinement_prompt("A", "a1")).await;
        assert_eq!(orch.phase(), Phase::AwaitingRefinement);

        let second = tokio::spawn({
            let orch = orch.clone();
            async move { orch.submit("B").await }
        });
        engine.wait_for_call("B").await;
        assert_eq!(orch.phase(), Phase::AwaitingInitial);

        a2.send(Ok("A final".into())).unwrap();
        first.await.unwrap();
        let snap = orch.snapshot();
        assert_eq!(snap.prompt.as_deref(), Some("B"));
        assert_eq!(snap.phase, Phase::AwaitingInitial);
        assert_eq!(snap.final_text, "");

        b1.send(Err(InferenceError::HttpStatus(503))).unwrap();
        second.await.unwrap();
        let snap = orch.snapshot();
        assert_eq!(snap.phase, Phase::Settled);
        assert_eq!(snap.last_error, Some(InferenceError::HttpStatus(503)));
    }

    #[tokio::test]
    async fn try_spawn_rejects_while_in_flight() {
        let engine = GatedEngine::new();
        let orch = Orchestrator::new(engine.clone(), "phi3");
        let a1 = engine.gate("A");

        assert_eq!(orch.try_spawn_submit("A"), SubmitOutcome::Started);
        assert!(orch.is_busy());
        assert_eq!(orch.try_spawn_submit("B"), SubmitOutcome::Busy);
        assert_eq!(orch.try_spawn_submit("  "), SubmitOutcome::EmptyPrompt);
        assert_eq!(orch.snapshot().prompt.as_deref(), Some("A"));

        engine.wait_for_call("A").await;
        a1.send(Err(InferenceError::Transport("down".into()))).unwrap();
        wait_for_phase(&orch, Phase::Settled).await;
        assert!(!engine.called("B"));
    }

    #[tokio::test]
    async fn spawn_submit_aborts_replaced_task() {
        let engine = GatedEngine::new();
        let orch = Orchestrator::new(engine.clone(), "phi3");
        let a1 = engine.gate("A");
        let b1 = engine.gate("B");
        let b2 = engine.gate(&refinement_prompt("B", "b1"));

        orch.spawn_submit("A");
        engine.wait_for_call("A").await;
        orch.spawn_submit("B");
        engine.wait_for_call("B").await;

        // A 的任务已被 abort，接收端随之丢弃
        for _ in 0..1000 {
            if a1.is_closed() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(a1.is_closed());

        b1.send(Ok("b1".into())).unwrap();
        b2.send(Ok("B final".into())).unwrap();
        wait_for_phase(&orch, Phase::Settled).await;
        assert_eq!(orch.snapshot().final_text, "B final");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_spawn_submits_leave_only_latest_task_running() {
        let engine = GatedEngine::new();
        let orch = Orchestrator::new(engine.clone(), "phi3");

        let prompts: Vec<String> = (0..16).map(|i| format!("prompt {i}")).collect();
        let senders: Vec<_> = prompts.iter().map(|p| engine.gate(p)).collect();

        let callers: Vec<_> = prompts
            .iter()
            .cloned()
            .map(|p| {
                let orch = orch.clone();
                tokio::spawn(async move { orch.spawn_submit(&p) })
            })
            .collect();
        for caller in callers {
            assert_eq!(caller.await.unwrap(), SubmitOutcome::Started);
        }

        let current = orch.snapshot().prompt.unwrap();
        engine.wait_for_call(&current).await;

        // 被替换的会话要么从未发出请求，要么其任务已被 abort（接收端随之丢弃）
        let settled = |engine: &GatedEngine| {
            prompts
                .iter()
                .zip(&senders)
                .filter(|(p, _)| **p != current)
                .all(|(p, tx)| engine.pending(p) || tx.is_closed())
        };
        for _ in 0..1000 {
            if settled(&engine) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(settled(&engine));

        let idx = prompts.iter().position(|p| *p == current).unwrap();
        assert!(!senders[idx].is_closed());
        assert_eq!(orch.phase(), Phase::AwaitingInitial);
    }

    #[test]
    fn failure_message_names_model_without_detail() {
        let msg = failure_message("phi3");
        assert!(msg.contains("phi3"));
        assert!(msg.starts_with("Error:"));
    }
}
