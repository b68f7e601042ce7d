//! 版本表达式解析
//!
//! 请求的版本可能是精确版本、范围/通配表达式或任意不透明字符串。
//! 解析刻意宽松：精确版本与无法解析的表达式原样透传，范围表达式
//! 对已发布版本求解，无匹配时同样透传。发现端随后在后端查不到
//! 实例即可，绝不因解析本身报错。

use semver::{Version, VersionReq};

/// 版本表达式的解析结果
#[derive(Debug, Clone)]
pub enum VersionExpression {
    /// 无法解析为范围要求，按原样透传
    Opaque(String),
    /// 精确版本，跳过范围求解
    Exact(String),
    /// 范围要求，需要对已发布版本求解
    Range {
        requirement: VersionReq,
        original: String,
    },
}

impl VersionExpression {
    pub fn parse(expression: &str) -> Self {
        let Ok(requirement) = VersionReq::parse(expression) else {
            return VersionExpression::Opaque(expression.to_string());
        };
        if !expression.contains('*')
            && !expression.contains('x')
            && Version::parse(expression).is_ok()
        {
            return VersionExpression::Exact(expression.to_string());
        }
        VersionExpression::Range {
            requirement,
            original: expression.to_string(),
        }
    }

    /// 是否需要查询已发布版本列表
    pub fn needs_lookup(&self) -> bool {
        matches!(self, VersionExpression::Range { .. })
    }

    /// 对已发布版本列表求解
    ///
    /// 匹配时返回版本的原始文本（不做规范化），否则返回原表达式。
    pub fn resolve(&self, published: &[String]) -> String {
        match self {
            VersionExpression::Opaque(expression) | VersionExpression::Exact(expression) => {
                expression.clone()
            }
            VersionExpression::Range {
                requirement,
                original,
            } => select_highest(requirement, published).unwrap_or_else(|| original.clone()),
        }
    }
}

/// 升序排序后自最高版本向下扫描，返回第一个满足要求的版本
///
/// 无法解析为语义版本的条目被丢弃。
fn select_highest(requirement: &VersionReq, published: &[String]) -> Option<String> {
    let mut parsed: Vec<(Version, &str)> = published
        .iter()
        .filter_map(|text| Version::parse(text).ok().map(|version| (version, text.as_str())))
        .collect();
    parsed.sort_by(|a, b| a.0.cmp(&b.0));
    parsed
        .iter()
        .rev()
        .find(|(version, _)| requirement.matches(version))
        .map(|(_, text)| (*text).to_string())
}
