use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// 图片记录，每张图片一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// 图片路径，同时作为主键
    #[serde(rename = "image")]
    pub key: String,
    /// 排序用时间戳，写入时由 exif 推导
    #[serde(default)]
    pub timestamp: f64,
    /// 像素数量
    #[serde(default, rename = "pixels")]
    pub size: u64,
    /// 标签，保持插入顺序，允许重复
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// 其余的分类、检测、位置等数据，存储层不关心其结构
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Record {
    /// 是否存在任意一个标签与过滤条件完全相同
    pub fn has_tag(&self, filter: &TagFilter) -> bool {
        self.tags.iter().any(|tag| tag.key == filter.tag && tag.value == filter.value)
    }
}

/// 单个标签，JSON 中表示为只有一个键的对象，例如 `{"category": "cat"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Tag {
    pub key: String,
    pub value: Value,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

impl TryFrom<Map<String, Value>> for Tag {
    type Error = String;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        if map.len() != 1 {
            return Err(format!("tag must have exactly one entry, got {}", map.len()));
        }
        let (key, value) = map.into_iter().next().ok_or("empty tag")?;
        Ok(Self { key, value })
    }
}

impl From<Tag> for Map<String, Value> {
    fn from(tag: Tag) -> Self {
        let mut map = Map::with_capacity(1);
        map.insert(tag.key, tag.value);
        map
    }
}

/// 标签过滤条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagFilter {
    pub tag: String,
    pub value: Value,
}

impl TagFilter {
    pub fn new(tag: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { tag: tag.into(), value: value.into() }
    }
}

/// 解析 `key=value` 形式的过滤条件，value 总是作为字符串
impl FromStr for TagFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, value) =
            s.split_once('=').ok_or_else(|| format!("无效的标签过滤条件: {s}"))?;
        if tag.is_empty() {
            return Err(format!("标签名不能为空: {s}"));
        }
        Ok(Self::new(tag, value))
    }
}

/// 缩略图，保存解码后的图片数据
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub mime: String,
    pub data: Vec<u8>,
}

impl Thumbnail {
    /// 从 `data:image/jpeg;base64,...` 形式的 URL 中解码
    pub fn from_data_url(url: &str) -> Result<Self, String> {
        let rest = url.strip_prefix("data:").ok_or("thumbnail is not a data url")?;
        let (header, payload) = rest.split_once(',').ok_or("data url has no payload")?;
        let (mime, base64) = match header.strip_suffix(";base64") {
            Some(mime) => (mime, true),
            None => (header, false),
        };
        let data = if base64 {
            STANDARD.decode(payload).map_err(|e| e.to_string())?
        } else {
            payload.as_bytes().to_vec()
        };
        let mime = if mime.is_empty() { "application/octet-stream" } else { mime };
        Ok(Self { mime: mime.to_owned(), data })
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.data))
    }
}

impl fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thumbnail").field("mime", &self.mime).field("len", &self.data.len()).finish()
    }
}

impl<'de> Deserialize<'de> for ThumbnailField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let url = String::deserialize(deserializer)?;
        Thumbnail::from_data_url(&url).map(ThumbnailField).map_err(serde::de::Error::custom)
    }
}

/// 输入数据中的缩略图字段
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailField(pub Thumbnail);

/// 一张图片中检测到的人物描述
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonSet {
    pub persons: Vec<Value>,
}

impl PersonSet {
    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }
}

/// 单个对象视为只有一个元素，null 视为空
fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PersonSet, D::Error> {
    let persons = match Value::deserialize(deserializer)? {
        Value::Null => vec![],
        Value::Array(persons) => persons,
        other => vec![other],
    };
    Ok(PersonSet { persons })
}

/// `Record` 自身的字段名，不能再出现在 `body` 中
const RECORD_FIELDS: &[&str] = &["image", "timestamp", "pixels", "tags"];

/// 处理流水线产出的完整记录，写入时会被拆分为三行
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IngestRecord {
    #[serde(rename = "image")]
    pub key: String,
    #[serde(default)]
    pub thumbnail: Option<ThumbnailField>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub person: PersonSet,
    #[serde(default, rename = "pixels")]
    pub size: u64,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl IngestRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            thumbnail: None,
            person: PersonSet::default(),
            size: 0,
            tags: vec![],
            body: Map::new(),
        }
    }

    pub fn with_exif_created(mut self, created: f64) -> Self {
        let exif = self.body.entry("exif").or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(exif) = exif {
            exif.insert("created".to_owned(), Value::from(created));
        }
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: Thumbnail) -> Self {
        self.thumbnail = Some(ThumbnailField(thumbnail));
        self
    }

    pub fn with_persons(mut self, persons: Vec<Value>) -> Self {
        self.person = PersonSet { persons };
        self
    }

    /// 排序时间戳：`exif.created`，其次 `exif.modified`，都没有则为 0
    pub fn derive_timestamp(&self) -> f64 {
        let exif = self.body.get("exif");
        let field = |name: &str| exif.and_then(|e| e.get(name)).and_then(timestamp_value);
        field("created").or_else(|| field("modified")).unwrap_or(0.)
    }

    /// 拆分为记录、缩略图、人物三部分
    pub fn split(self) -> (Record, Option<Thumbnail>, PersonSet) {
        let timestamp = self.derive_timestamp();
        let mut body = self.body;
        // 索引字段只能由上面推导，输入中的同名字段直接丢弃
        for name in RECORD_FIELDS {
            body.remove(*name);
        }
        let record = Record { key: self.key, timestamp, size: self.size, tags: self.tags, body };
        (record, self.thumbnail.map(|t| t.0), self.person)
    }
}

/// 0 和空值与缺失等价
fn timestamp_value(value: &Value) -> Option<f64> {
    let ts = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    (ts != 0. && ts.is_finite()).then_some(ts)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_tag_json_shape() {
        let record: Record = serde_json::from_value(json!({
            "image": "media/a.jpg",
            "tags": [{"category": "cat"}, {"category": "animal"}, {"year": 2020}],
        }))
        .unwrap();
        assert_eq!(record.tags[0], Tag::new("category", "cat"));
        assert_eq!(record.tags[2], Tag::new("year", 2020));

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["tags"][1], json!({"category": "animal"}));
    }

    #[test]
    fn test_tag_rejects_multi_entry() {
        let result = serde_json::from_value::<Tag>(json!({"a": 1, "b": 2}));
        assert!(result.is_err());
    }

    #[test]
    fn test_body_is_kept() {
        let record: Record = serde_json::from_value(json!({
            "image": "media/a.jpg",
            "pixels": 100,
            "classify": [{"class": "dog"}],
        }))
        .unwrap();
        assert_eq!(record.size, 100);
        assert_eq!(record.body["classify"], json!([{"class": "dog"}]));
        assert!(!record.body.contains_key("image"));
    }

    #[test]
    fn test_derive_timestamp() {
        let r: IngestRecord =
            serde_json::from_value(json!({"image": "a", "exif": {"created": 5, "modified": 9}}))
                .unwrap();
        assert_eq!(r.derive_timestamp(), 5.);

        let r: IngestRecord =
            serde_json::from_value(json!({"image": "a", "exif": {"modified": 9}})).unwrap();
        assert_eq!(r.derive_timestamp(), 9.);

        let r: IngestRecord =
            serde_json::from_value(json!({"image": "a", "exif": {"created": 0, "modified": 9}}))
                .unwrap();
        assert_eq!(r.derive_timestamp(), 9.);

        let r: IngestRecord = serde_json::from_value(json!({"image": "a"})).unwrap();
        assert_eq!(r.derive_timestamp(), 0.);
    }

    #[test]
    fn test_split() {
        let r: IngestRecord = serde_json::from_value(json!({
            "image": "media/a.jpg",
            "thumbnail": "data:image/jpeg;base64,AAEC",
            "person": {"age": 30},
            "exif": {"created": 7},
        }))
        .unwrap();
        let (record, thumbnail, person) = r.split();
        assert_eq!(record.timestamp, 7.);
        assert!(!record.body.contains_key("thumbnail"));
        assert!(!record.body.contains_key("person"));
        let thumbnail = thumbnail.unwrap();
        assert_eq!(thumbnail.mime, "image/jpeg");
        assert_eq!(thumbnail.data, vec![0, 1, 2]);
        assert_eq!(person.persons, vec![json!({"age": 30})]);
    }

    #[test]
    fn test_split_drops_incoming_timestamp() {
        let r: IngestRecord = serde_json::from_value(json!({
            "image": "a.jpg",
            "timestamp": 7.0,
            "exif": {"created": 5},
        }))
        .unwrap();
        let (record, _, _) = r.with_field("timestamp", 9).split();
        assert_eq!(record.timestamp, 5.);
        assert!(!record.body.contains_key("timestamp"));

        // 序列化后能再次读回
        let text = serde_json::to_string(&record).unwrap();
        let back: Record = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_person_null() {
        let r: IngestRecord =
            serde_json::from_value(json!({"image": "a", "person": null})).unwrap();
        assert!(r.person.is_empty());
    }

    #[test]
    fn test_data_url() {
        let thumb = Thumbnail { mime: "image/png".into(), data: vec![1, 2, 3, 4] };
        let parsed = Thumbnail::from_data_url(&thumb.to_data_url()).unwrap();
        assert_eq!(parsed, thumb);
        assert!(Thumbnail::from_data_url("http://example.com/a.jpg").is_err());
    }

    #[test]
    fn test_tag_filter_from_str() {
        let filter: TagFilter = "category=cat".parse().unwrap();
        assert_eq!(filter, TagFilter::new("category", "cat"));
        assert!("category".parse::<TagFilter>().is_err());
        assert!("=cat".parse::<TagFilter>().is_err());
    }
}
