//! 目标空间标识与按键查找.
//!
//! 空间标识的文本形式为 `模板[:cohort-x][:k-v]...`, 例如 `MNI152NLin6Asym:res-2`.
//! cohort 属于空间本身 (它决定了使用哪个结构像到模板的变换),
//! 其余限定符 (分辨率, 密度) 只影响采样网格.

use std::collections::BTreeMap;
use std::fmt;

use crate::consts::space::NATIVE_RESOLUTION;
use crate::error::{ResampleError, Result};

/// 非标准空间标签. 它们不对应任何模板.
const NONSTANDARD: [&str; 11] = [
    "T1w", "T2w", "anat", "fsnative", "func", "run", "sbref", "boldref", "session", "individual",
    "dwi",
];

/// 一个目标空间.
///
/// 相等与哈希按 (空间, 限定符) 整体比较, 因此同一模板的不同分辨率是不同的空间.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpatialReference {
    template: String,
    cohort: Option<String>,
    spec: Vec<(String, String)>,
}

impl SpatialReference {
    /// 不带任何限定符的空间.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            cohort: None,
            spec: Vec::new(),
        }
    }

    /// 解析文本形式.
    pub fn parse(input: &str) -> Result<Self> {
        let fail = |reason: &str| ResampleError::Parse {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        let mut parts = input.split(':');
        let template = parts.next().unwrap_or_default().trim();
        if template.is_empty() {
            return Err(fail("empty template name"));
        }
        let mut ans = Self::new(template);
        for part in parts {
            let (k, v) = part
                .split_once('-')
                .ok_or_else(|| fail("qualifier must look like `key-value`"))?;
            if k.is_empty() || v.is_empty() {
                return Err(fail("empty qualifier key or value"));
            }
            if k == "cohort" {
                ans.cohort = Some(v.to_string());
            } else {
                ans = ans.with_spec(k, v);
            }
        }
        Ok(ans)
    }

    /// 追加或覆盖一个限定符.
    pub fn with_spec(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.spec.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.spec.push((key, value)),
        }
        self
    }

    /// 附加 cohort.
    pub fn with_cohort(mut self, cohort: impl Into<String>) -> Self {
        self.cohort = Some(cohort.into());
        self
    }

    /// 模板名 (不含 cohort).
    #[inline]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// cohort (若有).
    #[inline]
    pub fn cohort(&self) -> Option<&str> {
        self.cohort.as_deref()
    }

    /// 空间名: 模板加 cohort, 例如 `MNIPediatricAsym:cohort-1`.
    /// 它是结构像到模板变换映射的键.
    pub fn space(&self) -> String {
        match &self.cohort {
            Some(c) => format!("{}:cohort-{}", self.template, c),
            None => self.template.clone(),
        }
    }

    /// 限定符.
    #[inline]
    pub fn spec(&self) -> &[(String, String)] {
        &self.spec
    }

    /// 查询限定符.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.spec
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// 分辨率限定符 (`res` 或 `resolution`).
    pub fn resolution(&self) -> Option<&str> {
        self.get("res").or_else(|| self.get("resolution"))
    }

    /// 是否要求保持 BOLD 原始分辨率 (`res-native`).
    pub fn is_native_resolution(&self) -> bool {
        self.resolution() == Some(NATIVE_RESOLUTION)
    }

    /// 是否为标准模板空间.
    pub fn is_standard(&self) -> bool {
        !NONSTANDARD.contains(&self.template.as_str())
    }

    /// 是否为 FreeSurfer 表面空间 (`fsnative` 或 `fsaverage*`).
    pub fn is_freesurfer(&self) -> bool {
        self.template == "fsnative" || self.template.starts_with("fsaverage")
    }

    /// 作为输出集合键的扁平字符串, 例如 `MNI152NLin6Asym_res-2`.
    pub fn key(&self) -> String {
        let mut ans = self.space();
        for (k, v) in self.spec.iter() {
            ans.push('_');
            ans.push_str(k);
            ans.push('-');
            ans.push_str(v);
        }
        ans
    }
}

impl fmt::Display for SpatialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.space())?;
        for (k, v) in self.spec.iter() {
            write!(f, ":{k}-{v}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for SpatialReference {
    type Err = ResampleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// 字符串键到产物的映射, 缺键时返回带可用键列表的 `MissingKey`.
#[derive(Clone, Debug)]
pub struct KeyedMap<T> {
    what: &'static str,
    entries: BTreeMap<String, T>,
}

impl<T> KeyedMap<T> {
    /// 空映射. `what` 用于错误信息, 例如 `"anat2std transform"`.
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            entries: BTreeMap::new(),
        }
    }

    /// 插入. 返回被覆盖的旧值.
    pub fn insert(&mut self, key: impl Into<String>, value: T) -> Option<T> {
        self.entries.insert(key.into(), value)
    }

    /// 链式插入.
    pub fn with(mut self, key: impl Into<String>, value: T) -> Self {
        self.insert(key, value);
        self
    }

    /// 查找, 缺键时返回 `Err`.
    pub fn get(&self, key: &str) -> Result<&T> {
        self.entries
            .get(key)
            .ok_or_else(|| ResampleError::missing_key(self.what, key, self.entries.keys().cloned()))
    }

    /// 是否含有键.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// 已有的键 (字典序).
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// 条目数.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_key() {
        let r = SpatialReference::parse("MNI152NLin6Asym:res-2").unwrap();
        assert_eq!(r.template(), "MNI152NLin6Asym");
        assert_eq!(r.resolution(), Some("2"));
        assert_eq!(r.key(), "MNI152NLin6Asym_res-2");
        assert_eq!(r.to_string(), "MNI152NLin6Asym:res-2");

        let c: SpatialReference = "MNIPediatricAsym:cohort-1:res-2".parse().unwrap();
        assert_eq!(c.template(), "MNIPediatricAsym");
        assert_eq!(c.space(), "MNIPediatricAsym:cohort-1");
        assert_eq!(c.key(), "MNIPediatricAsym:cohort-1_res-2");
        assert!(c.is_standard());

        let t1 = SpatialReference::parse("T1w").unwrap();
        assert!(!t1.is_standard());
        assert_eq!(t1.key(), "T1w");
        assert!(SpatialReference::parse("fsaverage:den-10k").unwrap().is_freesurfer());
    }

    #[test]
    fn test_parse_errors() {
        assert!(SpatialReference::parse("").is_err());
        assert!(SpatialReference::parse("MNI152Lin:res").is_err());
        assert!(SpatialReference::parse("MNI152Lin:-2").is_err());
    }

    #[test]
    fn test_identity_includes_spec() {
        let a = SpatialReference::parse("MNI152Lin:res-1").unwrap();
        let b = SpatialReference::parse("MNI152Lin:res-2").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.space(), b.space());
        assert_eq!(a, SpatialReference::new("MNI152Lin").with_spec("res", "1"));
    }

    #[test]
    fn test_keyed_map_missing() {
        let m = KeyedMap::new("anat2std transform").with("MNI152Lin", 1).with("MNI152NLin6Asym", 2);
        assert_eq!(*m.get("MNI152Lin").unwrap(), 1);
        match m.get("MNI152NLin2009cAsym").unwrap_err() {
            ResampleError::MissingKey { what, key, available } => {
                assert_eq!(what, "anat2std transform");
                assert_eq!(key, "MNI152NLin2009cAsym");
                assert_eq!(available, vec!["MNI152Lin", "MNI152NLin6Asym"]);
            }
            e => panic!("unexpected error {e}"),
        }
    }
}
