use serde::{Deserialize, Serialize};

use crate::error::InferenceError;

/// 一次提交的生命周期，只能按顺序向前推进
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    AwaitingInitial,
    AwaitingRefinement,
    Settled,
}

impl Phase {
    pub fn is_in_flight(self) -> bool {
        matches!(self, Phase::AwaitingInitial | Phase::AwaitingRefinement)
    }
}

/// 哪一阶段失败（只用于日志，不对用户区分）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Initial,
    Refinement,
}

/// Settled 之后的结果：要么是精炼后的文本，要么是错误，二者只有其一
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Refined(String),
    Failed { stage: Stage, error: InferenceError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefinementSession {
    original_prompt: String,
    phase: Phase,
    outcome: Option<Outcome>,
}

impl RefinementSession {
    /// 新建即进入 AwaitingInitial；Idle 表示"还没有会话"
    pub fn start(original_prompt: &str) -> Self {
        Self {
            original_prompt: original_prompt.to_string(),
            phase: Phase::AwaitingInitial,
            outcome: None,
        }
    }

    pub fn original_prompt(&self) -> &str {
        &self.original_prompt
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// 成功结束时的最终文本，否则为空串
    pub fn final_text(&self) -> &str {
        match &self.outcome {
            Some(Outcome::Refined(text)) => text,
            _ => "",
        }
    }

    pub fn last_error(&self) -> Option<&InferenceError> {
        match &self.outcome {
            Some(Outcome::Failed { error, .. }) => Some(error),
            _ => None,
        }
    }

    /// AwaitingInitial -> AwaitingRefinement。其它状态调用返回 false 且不改变状态
    pub fn begin_refinement(&mut self) -> bool {
        if self.phase != Phase::AwaitingInitial {
            return false;
        }
        self.phase = Phase::AwaitingRefinement;
        true
    }

    /// AwaitingRefinement -> Settled(成功)。空文本按 EmptyAnswer 失败处理
    pub fn settle_refined(&mut self, text: String) -> bool {
        if self.phase != Phase::AwaitingRefinement {
            return false;
        }
        if text.is_empty() {
            return self.settle_failed(Stage::Refinement, InferenceError::EmptyAnswer);
        }
        self.phase = Phase::Settled;
        self.outcome = Some(Outcome::Refined(text));
        true
    }

    /// 任一等待状态 -> Settled(失败)
    pub fn settle_failed(&mut self, stage: Stage, error: InferenceError) -> bool {
        let expected = match stage {
            Stage::Initial => Phase::AwaitingInitial,
            Stage::Refinement => Phase::AwaitingRefinement,
        };
        if self.phase != expected {
            return false;
        }
        self.phase = Phase::Settled;
        self.outcome = Some(Outcome::Failed { stage, error });
        true
    }
}
