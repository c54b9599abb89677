use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 判例数据库（例如某个法院或裁判所的判决集合）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    #[serde(rename = "databaseId")]
    pub id: String,
    #[serde(default)]
    pub jurisdiction: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    #[serde(rename = "databaseId")]
    pub database_id: String,
    /// 按语言区分的判例 ID，例如 `{"en": "2008canlii71"}`。
    #[serde(rename = "caseId", default)]
    pub case_id: BTreeMap<String, String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub citation: String,
}

impl Case {
    /// 指定语言的判例 ID；缺失时退回任意一种语言。
    pub fn id(&self, language: &str) -> Option<&str> {
        self.case_id
            .get(language)
            .or_else(|| self.case_id.values().next())
            .map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DatabaseListResponse {
    #[serde(rename = "caseDatabases", default)]
    pub databases: Vec<Database>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CaseListResponse {
    #[serde(default)]
    pub cases: Vec<Case>,
}
