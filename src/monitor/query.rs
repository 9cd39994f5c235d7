//! SQL 语句分类、归一化与摘要

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

const PREVIEW_CHARS: usize = 200;

const QUERY_TYPES: [&str; 7] = ["SELECT", "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP"];

/// 折叠空白并去掉首尾空白
pub fn normalize(sql: &str) -> String {
    WHITESPACE.replace_all(sql.trim(), " ").into_owned()
}

/// 语句类型，按首个关键字判断，未知为 OTHER
pub fn query_type(sql: &str) -> &'static str {
    let head = sql.trim_start().split_whitespace().next().unwrap_or("");
    QUERY_TYPES
        .iter()
        .find(|t| head.eq_ignore_ascii_case(t))
        .copied()
        .unwrap_or("OTHER")
}

/// 归一化语句的 SHA-256（十六进制）
pub fn query_hash(sql: &str) -> String {
    format!("{:x}", Sha256::digest(normalize(sql).as_bytes()))
}

/// 归一化语句的前 200 个字符
pub fn preview(sql: &str) -> String {
    normalize(sql).chars().take(PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_type() {
        assert_eq!(query_type("  select * from users"), "SELECT");
        assert_eq!(query_type("INSERT INTO t VALUES (1)"), "INSERT");
        assert_eq!(query_type("update t set a = 1"), "UPDATE");
        assert_eq!(query_type("DELETE FROM t"), "DELETE");
        assert_eq!(query_type("create table t (id int)"), "CREATE");
        assert_eq!(query_type("ALTER TABLE t ADD c int"), "ALTER");
        assert_eq!(query_type("drop table t"), "DROP");
        assert_eq!(query_type("VACUUM"), "OTHER");
        assert_eq!(query_type(""), "OTHER");
        // 关键字必须是完整单词
        assert_eq!(query_type("SELECTED"), "OTHER");
    }

    #[test]
    fn test_hash_ignores_whitespace_layout() {
        let a = query_hash("SELECT *\n  FROM courses\tWHERE id = $1");
        let b = query_hash("SELECT * FROM courses WHERE id = $1 ");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, query_hash("SELECT * FROM lessons WHERE id = $1"));
    }

    #[test]
    fn test_preview_truncates() {
        let long = format!("SELECT {}", "x, ".repeat(200));
        let p = preview(&long);
        assert_eq!(p.chars().count(), 200);
        assert!(p.starts_with("SELECT x, x,"));
    }
}
