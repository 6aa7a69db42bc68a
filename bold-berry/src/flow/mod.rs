//! 有向无环数据流图.
//!
//! 每个 [`Task`] 声明具名的输入槽位 (绑定到 `"<task>.<slot>"` 或工作流输入
//! `"inputnode.<slot>"`) 与输出槽位. [`Scheduler`] 只在一个任务的全部输入都已就绪时执行它.
//! 扇出 ([`Workflow::fan_out`]) 为每个参数实例化一个分支, 汇合 ([`Workflow::join`])
//! 是一个屏障任务, 按参数顺序收集各分支的输出, 与完成顺序无关.

use std::any::{type_name, Any};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;

mod join;
mod scheduler;
mod task;

pub use join::{fan_out_join, Joined};
pub use scheduler::Scheduler;
pub use task::{Source, Task, TaskFn, INPUT_NODE};

/// 工作流结构或槽位错误.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    /// 任务名重复.
    #[error("duplicate task `{0}`")]
    DuplicateTask(String),

    /// 输入绑定到了不存在的任务或未声明的输出.
    #[error("task `{task}` input `{slot}` is bound to unknown source `{source_slot}`")]
    UnknownSource {
        /// 任务.
        task: String,
        /// 输入槽位.
        slot: String,
        /// 绑定的来源.
        source_slot: String,
    },

    /// 图中存在环.
    #[error("cycle through tasks {0:?}")]
    Cycle(Vec<String>),

    /// 工作流输入未提供.
    #[error("workflow input `{0}` was not provided")]
    MissingInput(String),

    /// 任务声明了输出但执行后没有产出.
    #[error("task `{task}` did not produce declared output `{slot}`")]
    MissingOutput {
        /// 任务.
        task: String,
        /// 输出槽位.
        slot: String,
    },

    /// 槽位中没有该值.
    #[error("no slot named `{0}`")]
    MissingSlot(String),

    /// 槽位类型与请求的不一致.
    #[error("slot `{slot}` does not hold a `{expected}`")]
    SlotType {
        /// 槽位.
        slot: String,
        /// 请求的类型.
        expected: &'static str,
    },

    /// 任务执行时 panic.
    #[error("task `{0}` panicked")]
    Panicked(String),
}

/// 槽位中的值. 构造后只读, 在分支之间共享.
pub type Value = Arc<dyn Any + Send + Sync>;

/// 具名槽位集合.
#[derive(Clone, Default)]
pub struct Slots {
    values: HashMap<String, Value>,
}

impl std::fmt::Debug for Slots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("Slots").field("keys", &keys).finish()
    }
}

impl Slots {
    /// 空集合.
    pub fn new() -> Self {
        Self::default()
    }

    /// 放入一个值.
    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.values.insert(name.into(), Arc::new(value));
    }

    /// 链式放入一个值.
    pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
        self.insert(name, value);
        self
    }

    /// 放入一个已经共享的值.
    pub fn insert_value(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// 取出原始共享值.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// 是否含有槽位.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// 以具体类型借用槽位中的值.
    pub fn get<T: Any>(&self, name: &str) -> Result<&T, FlowError> {
        self.values
            .get(name)
            .ok_or_else(|| FlowError::MissingSlot(name.to_string()))?
            .downcast_ref::<T>()
            .ok_or_else(|| FlowError::SlotType {
                slot: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// 以具体类型共享槽位中的值.
    pub fn get_arc<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, FlowError> {
        let v = self
            .values
            .get(name)
            .ok_or_else(|| FlowError::MissingSlot(name.to_string()))?;
        Arc::clone(v)
            .downcast::<T>()
            .map_err(|_| FlowError::SlotType {
                slot: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// 槽位名.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// 槽位个数.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 是否为空.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// 扇出产生的一个分支.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Branch {
    /// 扇出标签.
    pub label: String,
    /// 参数位置.
    pub index: usize,
    /// 参数键.
    pub key: String,
}

impl Branch {
    /// 分支前缀, 例如 `std_trans[MNI152NLin6Asym_res-2]`.
    pub fn prefix(&self) -> String {
        format!("{}[{}]", self.label, self.key)
    }

    /// 分支内任务的全名.
    pub fn task(&self, local: &str) -> String {
        format!("{}/{local}", self.prefix())
    }

    /// 分支内任务输出槽位的来源字符串.
    pub fn source(&self, local: &str, slot: &str) -> String {
        format!("{}.{slot}", self.task(local))
    }
}

/// 一次扇出的全部分支, 按参数顺序排列.
#[derive(Clone, Debug)]
pub struct FanOut {
    /// 扇出标签.
    pub label: String,
    /// 分支.
    pub branches: Vec<Branch>,
}

impl FanOut {
    /// 参数键, 按参数顺序.
    pub fn keys(&self) -> Vec<String> {
        self.branches.iter().map(|b| b.key.clone()).collect()
    }
}

/// 任务图.
#[derive(Clone, Debug, Default)]
pub struct Workflow {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

impl Workflow {
    /// 空图.
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入一个任务. 名字重复时返回 `Err`.
    pub fn add(&mut self, task: Task) -> Result<(), FlowError> {
        if self.index.contains_key(task.name()) {
            return Err(FlowError::DuplicateTask(task.name().to_string()));
        }
        self.index.insert(task.name().to_string(), self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    /// 全部任务.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// 按名字查找任务.
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|i| &self.tasks[*i])
    }

    /// 参数化扇出: 为每个 `(键, 参数)` 调用一次 `build`, 返回的任务名应由
    /// [`Branch::task`] 生成. 返回的 [`FanOut`] 按参数顺序记录分支, 供 [`Self::join`] 使用.
    pub fn fan_out<P, F>(
        &mut self,
        label: &str,
        params: Vec<(String, P)>,
        mut build: F,
    ) -> Result<FanOut, FlowError>
    where
        F: FnMut(&Branch, P) -> Vec<Task>,
    {
        let mut branches = Vec::with_capacity(params.len());
        for (index, (key, param)) in params.into_iter().enumerate() {
            let branch = Branch {
                label: label.to_string(),
                index,
                key,
            };
            for task in build(&branch, param) {
                self.add(task)?;
            }
            branches.push(branch);
        }
        Ok(FanOut {
            label: label.to_string(),
            branches,
        })
    }

    /// 汇合: 加入名为 `name` 的屏障任务, 它等待 `fan` 的每个分支中 `local.slot` 就绪,
    /// 并按参数顺序输出 `Joined<Arc<T>>` 到槽位 `out`.
    pub fn join<T: Any + Send + Sync>(
        &mut self,
        name: &str,
        fan: &FanOut,
        local: &str,
        slot: &str,
    ) -> Result<(), FlowError> {
        let keys = fan.keys();
        let n = keys.len();
        let mut task = Task::new(name).output("out");
        for (i, b) in fan.branches.iter().enumerate() {
            task = task.input(format!("b{i}"), b.source(local, slot));
        }
        let task = task.body(move |inputs| {
            let items = (0..n)
                .map(|i| inputs.get_arc::<T>(&format!("b{i}")))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Slots::new().with("out", Joined::new(keys.clone(), items)?))
        });
        self.add(task)
    }

    /// 校验结构并返回一个拓扑序.
    ///
    /// 检查: 每个输入的来源任务存在且声明了该输出; 图中无环.
    pub fn validate(&self) -> Result<Vec<usize>, FlowError> {
        let n = self.tasks.len();
        let mut indegree = vec![0usize; n];
        let mut dependents = vec![Vec::new(); n];
        for (i, task) in self.tasks.iter().enumerate() {
            let mut upstream = HashSet::new();
            for (slot, source) in task.inputs() {
                if let Source::Output { task: from, slot: out } = source {
                    let j = self
                        .index
                        .get(from)
                        .copied()
                        .filter(|j| self.tasks[*j].outputs().iter().any(|o| o == out))
                        .ok_or_else(|| FlowError::UnknownSource {
                            task: task.name().to_string(),
                            slot: slot.clone(),
                            source_slot: source.to_string(),
                        })?;
                    if upstream.insert(j) {
                        indegree[i] += 1;
                        dependents[j].push(i);
                    }
                }
            }
        }

        // Kahn.
        let mut queue: VecDeque<usize> = (0..n).filter(|i| indegree[*i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &d in &dependents[i] {
                indegree[d] -= 1;
                if indegree[d] == 0 {
                    queue.push_back(d);
                }
            }
        }
        if order.len() != n {
            let mut stuck: Vec<String> = (0..n)
                .filter(|i| indegree[*i] > 0)
                .map(|i| self.tasks[i].name().to_string())
                .collect();
            stuck.sort();
            return Err(FlowError::Cycle(stuck));
        }
        Ok(order)
    }
}
