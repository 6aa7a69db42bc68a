use crate::error::{ResampleError, Result};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 汇合结果: 与扇出参数一一对应的键和值, 第 `i` 项总是对应第 `i` 个参数.
#[derive(Clone, Debug, PartialEq)]
pub struct Joined<T> {
    keys: Vec<String>,
    items: Vec<T>,
}

impl<T> Joined<T> {
    /// 由等长的键和值创建, 长度不等时返回 `Shape`.
    pub fn new(keys: Vec<String>, items: Vec<T>) -> Result<Self> {
        if keys.len() != items.len() {
            return Err(ResampleError::shape("joined items", &[keys.len()], &[items.len()]));
        }
        Ok(Self { keys, items })
    }

    /// 参数键, 按参数顺序.
    #[inline]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// 值, 按参数顺序.
    #[inline]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// 条目数.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 按键查找, 缺键时返回 `MissingKey`.
    pub fn select(&self, what: &'static str, key: &str) -> Result<&T> {
        self.keys
            .iter()
            .position(|k| k == key)
            .map(|i| &self.items[i])
            .ok_or_else(|| ResampleError::missing_key(what, key, self.keys.iter().cloned()))
    }

    /// 按参数顺序迭代 `(键, 值)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.keys.iter().map(String::as_str).zip(self.items.iter())
    }

    /// 逐项映射, 保持顺序.
    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> Joined<U> {
        Joined {
            keys: self.keys.clone(),
            items: self.items.iter().map(f).collect(),
        }
    }

    /// 拆出值.
    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

/// 进程内的参数化扇出与汇合.
///
/// 对每个 `(键, 参数)` 调用 `f`, 结果按参数顺序汇合. 一个分支失败不影响其他分支,
/// 全部结束后返回参数顺序中第一个失败, 错误以 `label[键]` 标记. 启用 `rayon` 时各分支并行执行.
pub fn fan_out_join<P, T, F>(label: &str, params: &[(String, P)], f: F) -> Result<Joined<T>>
where
    P: Sync,
    T: Send,
    F: Fn(&P) -> Result<T> + Sync + Send,
{
    let run = |(key, p): &(String, P)| f(p).map_err(|e| e.in_branch(format!("{label}[{key}]")));

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            let results: Vec<Result<T>> = params.par_iter().map(run).collect();
        } else {
            let results: Vec<Result<T>> = params.iter().map(run).collect();
        }
    }
    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        log::warn!("{label}: {failed} of {} branches failed", results.len());
    }
    let items = results.into_iter().collect::<Result<Vec<_>>>()?;
    let keys = params.iter().map(|(k, _)| k.clone()).collect();
    Ok(Joined { keys, items })
}
