use std::fmt;
use std::sync::Arc;

use super::Slots;
use crate::error::Result;

/// 工作流输入的伪任务名.
pub const INPUT_NODE: &str = "inputnode";

/// 任务体: 读取已绑定的输入槽位, 返回输出槽位.
pub type TaskFn = Arc<dyn Fn(&Slots) -> Result<Slots> + Send + Sync>;

/// 输入槽位的来源.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    /// 工作流输入 `inputnode.<slot>`.
    Input(String),

    /// 另一个任务的输出 `<task>.<slot>`.
    Output {
        /// 上游任务名.
        task: String,
        /// 上游输出槽位.
        slot: String,
    },
}

impl Source {
    /// 解析 `"<task>.<slot>"`. 任务名可以含 `.`, 槽位名不可以.
    /// 没有 `.` 的字符串视为工作流输入.
    pub fn parse(s: &str) -> Self {
        match s.rsplit_once('.') {
            Some((INPUT_NODE, slot)) => Self::Input(slot.to_string()),
            Some((task, slot)) => Self::Output {
                task: task.to_string(),
                slot: slot.to_string(),
            },
            None => Self::Input(s.to_string()),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input(slot) => write!(f, "{INPUT_NODE}.{slot}"),
            Self::Output { task, slot } => write!(f, "{task}.{slot}"),
        }
    }
}

/// 图中的一个节点. 一旦开始执行即为原子的, 其它任务看不到它的部分输出.
#[derive(Clone)]
pub struct Task {
    name: String,
    inputs: Vec<(String, Source)>,
    outputs: Vec<String>,
    body: TaskFn,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}

impl Task {
    /// 没有输入输出, 任务体为空操作的任务.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            body: Arc::new(|_| Ok(Slots::new())),
        }
    }

    /// 声明输入槽位 `slot`, 绑定到来源 `source` (见 [`Source::parse`]).
    pub fn input(mut self, slot: impl Into<String>, source: impl AsRef<str>) -> Self {
        self.inputs.push((slot.into(), Source::parse(source.as_ref())));
        self
    }

    /// 声明输出槽位.
    pub fn output(mut self, slot: impl Into<String>) -> Self {
        self.outputs.push(slot.into());
        self
    }

    /// 设置任务体.
    pub fn body<F>(mut self, f: F) -> Self
    where
        F: Fn(&Slots) -> Result<Slots> + Send + Sync + 'static,
    {
        self.body = Arc::new(f);
        self
    }

    /// 任务名.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 输入槽位及其来源.
    #[inline]
    pub fn inputs(&self) -> &[(String, Source)] {
        &self.inputs
    }

    /// 输出槽位.
    #[inline]
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// 执行任务体.
    pub fn run(&self, inputs: &Slots) -> Result<Slots> {
        (self.body)(inputs)
    }
}
