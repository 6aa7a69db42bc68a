use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;

use crossbeam::channel;

use super::{FlowError, Slots, Source, Workflow};
use crate::consts::THREADS_ENV;
use crate::error::{ResampleError, Result};

/// 获得可并行核心数.
pub(crate) fn cpus() -> usize {
    thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 依赖就绪驱动的执行器.
///
/// 任务在全部输入就绪后才被派发到工作线程; 任务一旦开始就执行到底.
/// 任务失败后, 依赖它的下游任务不再派发, 与它无关的任务照常执行.
/// 全部结束后返回图中最靠前的失败, 错误以失败任务的名字标记.
#[derive(Copy, Clone, Debug)]
pub struct Scheduler {
    workers: usize,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Scheduler {
    /// 指定工作线程数 (至少 1).
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// 工作线程数:
    ///
    /// 1. 若环境变量 `$BOLD_BERRY_THREADS` 是正整数, 则使用其值;
    /// 2. 否则, 使用可并行核心数.
    pub fn from_env() -> Self {
        let workers = std::env::var(THREADS_ENV)
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or_else(cpus);
        Self::new(workers)
    }

    /// 工作线程数.
    #[inline]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 执行整张图. `inputs` 提供 `inputnode.*` 槽位.
    ///
    /// 返回所有任务的全部输出, 键为 `"<task>.<slot>"`.
    pub fn run(&self, workflow: &Workflow, inputs: &Slots) -> Result<Slots> {
        let order = workflow.validate()?;
        let tasks = workflow.tasks();
        let n = tasks.len();

        // 依赖计数: 每个任务对不同上游任务各计一次.
        let mut pending = vec![0usize; n];
        let mut dependents = vec![Vec::new(); n];
        for &i in &order {
            let mut upstream: Vec<usize> = Vec::new();
            for (_, source) in tasks[i].inputs() {
                match source {
                    Source::Input(slot) => {
                        if !inputs.contains(slot) {
                            return Err(FlowError::MissingInput(slot.clone()).into());
                        }
                    }
                    Source::Output { task, .. } => {
                        let j = order
                            .iter()
                            .copied()
                            .find(|j| tasks[*j].name() == task)
                            .ok_or_else(|| FlowError::MissingSlot(task.clone()))?;
                        if !upstream.contains(&j) {
                            upstream.push(j);
                        }
                    }
                }
            }
            pending[i] = upstream.len();
            for j in upstream {
                dependents[j].push(i);
            }
        }

        let mut position = vec![0usize; n];
        for (p, &i) in order.iter().enumerate() {
            position[i] = p;
        }

        let mut outputs = Slots::new();
        let mut ready: Vec<usize> = order.iter().copied().filter(|i| pending[*i] == 0).collect();
        ready.reverse();
        let workers = self.workers.min(n.max(1));
        log::info!("running {n} tasks on {workers} workers");

        thread::scope(|s| {
            let (job_tx, job_rx) = channel::unbounded::<(usize, Slots)>();
            let (done_tx, done_rx) = channel::unbounded::<(usize, Result<Slots>)>();
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                s.spawn(move || {
                    for (i, bound) in job_rx.iter() {
                        let task = &tasks[i];
                        log::info!("[{}] started", task.name());
                        let res = catch_unwind(AssertUnwindSafe(|| task.run(&bound)))
                            .unwrap_or_else(|_| Err(FlowError::Panicked(task.name().to_string()).into()));
                        if done_tx.send((i, res)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);

            let mut running = 0usize;
            let mut finished = 0usize;
            let mut failures: Vec<(usize, ResampleError)> = Vec::new();
            loop {
                while let Some(i) = ready.pop() {
                    let bound = bind(&tasks[i], inputs, &outputs);
                    if job_tx.send((i, bound)).is_err() {
                        break;
                    }
                    running += 1;
                }
                if running == 0 {
                    break;
                }
                let Ok((i, res)) = done_rx.recv() else { break };
                running -= 1;
                let task = &tasks[i];
                match res.and_then(|out| collect(task.name(), task.outputs(), out, &mut outputs)) {
                    Ok(()) => {
                        finished += 1;
                        log::info!("[{}] finished", task.name());
                        for &d in &dependents[i] {
                            pending[d] -= 1;
                            if pending[d] == 0 {
                                ready.push(d);
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!("[{}] failed: {e}", task.name());
                        failures.push((position[i], e.in_branch(task.name())));
                    }
                }
            }
            drop(job_tx);

            if failures.is_empty() {
                return Ok(outputs);
            }
            let skipped = n - finished - failures.len();
            log::warn!(
                "workflow finished {finished} of {n} tasks, {} failed, {skipped} skipped",
                failures.len()
            );
            failures.sort_by_key(|(p, _)| *p);
            let (_, first) = failures.swap_remove(0);
            Err(first)
        })
    }
}

/// 按任务声明把已有的值绑定到本地输入槽位.
fn bind(task: &super::Task, inputs: &Slots, outputs: &Slots) -> Slots {
    let mut bound = Slots::new();
    for (slot, source) in task.inputs() {
        let value = match source {
            Source::Input(name) => inputs.value(name),
            Source::Output { .. } => outputs.value(&source.to_string()),
        };
        if let Some(v) = value {
            bound.insert_value(slot.clone(), v.clone());
        }
    }
    bound
}

/// 检查任务是否产出了全部声明的输出, 并以 `"<task>.<slot>"` 登记.
fn collect(name: &str, declared: &[String], produced: Slots, outputs: &mut Slots) -> Result<()> {
    for slot in declared {
        let value = produced.value(slot).ok_or_else(|| FlowError::MissingOutput {
            task: name.to_string(),
            slot: slot.clone(),
        })?;
        outputs.insert_value(format!("{name}.{slot}"), value.clone());
    }
    Ok(())
}
