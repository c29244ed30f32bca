//! Notion block tree: typed read model and the creation format used when
//! writing blocks back through the API.
//!
//! Every block type the blog uses gets its own payload struct. Anything else,
//! including known types whose payload does not match the expected shape, is
//! kept as [`BlockKind::Unsupported`] with its raw payload so it survives a
//! read/write cycle untouched.

use serde::de::DeserializeOwned;
use serde::ser::{Error as _, SerializeMap};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};

/// One styled run of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RichText {
    #[serde(rename = "type", default = "text_run_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextContent>,
    /// Bold/italic/color flags, carried as an opaque bag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
    #[serde(default)]
    pub plain_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    /// Mention and equation payloads.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn text_run_type() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<Value>,
}

impl RichText {
    /// A plain `text` run carrying `annotations` unchanged.
    pub fn plain(content: &str, annotations: Option<Value>) -> Self {
        Self {
            kind: text_run_type(),
            text: Some(TextContent {
                content: content.to_string(),
                link: None,
            }),
            annotations,
            plain_text: content.to_string(),
            href: None,
            extra: Map::new(),
        }
    }

    /// Visible text of the run, preferring `plain_text` over `text.content`.
    pub fn visible_text(&self) -> &str {
        if !self.plain_text.is_empty() {
            return &self.plain_text;
        }
        self.text.as_ref().map(|t| t.content.as_str()).unwrap_or("")
    }
}

/// Concatenate the visible text of every run.
pub fn concat_plain_text(runs: &[RichText]) -> String {
    runs.iter().map(RichText::visible_text).collect()
}

/// Payload shared by paragraphs, headings, list items, quotes and toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    #[serde(default)]
    pub rich_text: Vec<RichText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_toggleable: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalloutBlock {
    #[serde(default)]
    pub rich_text: Vec<RichText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBlock {
    #[serde(default)]
    pub rich_text: Vec<RichText>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caption: Vec<RichText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<String>,
}

/// Where a media block's bytes live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileSource {
    File { file: FileRef },
    External { external: FileRef },
}

impl FileSource {
    pub fn url(&self) -> &str {
        match self {
            FileSource::File { file } => &file.url,
            FileSource::External { external } => &external.url,
        }
    }
}

/// Image, video, file and pdf payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaBlock {
    #[serde(flatten)]
    pub source: FileSource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caption: Vec<RichText>,
}

/// Bookmark, embed and link preview payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkBlock {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caption: Vec<RichText>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableOfContentsBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Block type together with its type-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    Paragraph(TextBlock),
    Heading1(TextBlock),
    Heading2(TextBlock),
    Heading3(TextBlock),
    BulletedListItem(TextBlock),
    NumberedListItem(TextBlock),
    Quote(TextBlock),
    Toggle(TextBlock),
    Callout(CalloutBlock),
    Code(CodeBlock),
    Image(MediaBlock),
    Video(MediaBlock),
    File(MediaBlock),
    Pdf(MediaBlock),
    Bookmark(LinkBlock),
    Embed(LinkBlock),
    LinkPreview(LinkBlock),
    Divider,
    TableOfContents(TableOfContentsBlock),
    Unsupported { kind: String, payload: Value },
}

fn parse_payload<T: DeserializeOwned>(payload: &Value) -> Option<T> {
    serde_json::from_value(payload.clone()).ok()
}

impl BlockKind {
    /// Build a kind from Notion's `type` tag and the object stored under it.
    pub fn from_payload(kind: &str, payload: Value) -> Self {
        let parsed = match kind {
            "paragraph" => parse_payload(&payload).map(BlockKind::Paragraph),
            "heading_1" => parse_payload(&payload).map(BlockKind::Heading1),
            "heading_2" => parse_payload(&payload).map(BlockKind::Heading2),
            "heading_3" => parse_payload(&payload).map(BlockKind::Heading3),
            "bulleted_list_item" => parse_payload(&payload).map(BlockKind::BulletedListItem),
            "numbered_list_item" => parse_payload(&payload).map(BlockKind::NumberedListItem),
            "quote" => parse_payload(&payload).map(BlockKind::Quote),
            "toggle" => parse_payload(&payload).map(BlockKind::Toggle),
            "callout" => parse_payload(&payload).map(BlockKind::Callout),
            "code" => parse_payload(&payload).map(BlockKind::Code),
            "image" => parse_payload(&payload).map(BlockKind::Image),
            "video" => parse_payload(&payload).map(BlockKind::Video),
            "file" => parse_payload(&payload).map(BlockKind::File),
            "pdf" => parse_payload(&payload).map(BlockKind::Pdf),
            "bookmark" => parse_payload(&payload).map(BlockKind::Bookmark),
            "embed" => parse_payload(&payload).map(BlockKind::Embed),
            "link_preview" => parse_payload(&payload).map(BlockKind::LinkPreview),
            "divider" => Some(BlockKind::Divider),
            "table_of_contents" => parse_payload(&payload).map(BlockKind::TableOfContents),
            _ => None,
        };

        parsed.unwrap_or_else(|| BlockKind::Unsupported {
            kind: kind.to_string(),
            payload,
        })
    }

    /// Notion's `type` tag for this kind.
    pub fn type_name(&self) -> &str {
        match self {
            BlockKind::Paragraph(_) => "paragraph",
            BlockKind::Heading1(_) => "heading_1",
            BlockKind::Heading2(_) => "heading_2",
            BlockKind::Heading3(_) => "heading_3",
            BlockKind::BulletedListItem(_) => "bulleted_list_item",
            BlockKind::NumberedListItem(_) => "numbered_list_item",
            BlockKind::Quote(_) => "quote",
            BlockKind::Toggle(_) => "toggle",
            BlockKind::Callout(_) => "callout",
            BlockKind::Code(_) => "code",
            BlockKind::Image(_) => "image",
            BlockKind::Video(_) => "video",
            BlockKind::File(_) => "file",
            BlockKind::Pdf(_) => "pdf",
            BlockKind::Bookmark(_) => "bookmark",
            BlockKind::Embed(_) => "embed",
            BlockKind::LinkPreview(_) => "link_preview",
            BlockKind::Divider => "divider",
            BlockKind::TableOfContents(_) => "table_of_contents",
            BlockKind::Unsupported { kind, .. } => kind,
        }
    }

    /// Rich text of text-bearing kinds; `None` for media and structural kinds.
    pub fn rich_text(&self) -> Option<&[RichText]> {
        match self {
            BlockKind::Paragraph(b)
            | BlockKind::Heading1(b)
            | BlockKind::Heading2(b)
            | BlockKind::Heading3(b)
            | BlockKind::BulletedListItem(b)
            | BlockKind::NumberedListItem(b)
            | BlockKind::Quote(b)
            | BlockKind::Toggle(b) => Some(&b.rich_text),
            BlockKind::Callout(b) => Some(&b.rich_text),
            BlockKind::Code(b) => Some(&b.rich_text),
            _ => None,
        }
    }

    /// Same kind with its rich text swapped for `runs`. Kinds without rich
    /// text are returned unchanged.
    pub fn with_rich_text(&self, runs: Vec<RichText>) -> BlockKind {
        fn text(b: &TextBlock, runs: Vec<RichText>) -> TextBlock {
            TextBlock {
                rich_text: runs,
                ..b.clone()
            }
        }

        match self {
            BlockKind::Paragraph(b) => BlockKind::Paragraph(text(b, runs)),
            BlockKind::Heading1(b) => BlockKind::Heading1(text(b, runs)),
            BlockKind::Heading2(b) => BlockKind::Heading2(text(b, runs)),
            BlockKind::Heading3(b) => BlockKind::Heading3(text(b, runs)),
            BlockKind::BulletedListItem(b) => BlockKind::BulletedListItem(text(b, runs)),
            BlockKind::NumberedListItem(b) => BlockKind::NumberedListItem(text(b, runs)),
            BlockKind::Quote(b) => BlockKind::Quote(text(b, runs)),
            BlockKind::Toggle(b) => BlockKind::Toggle(text(b, runs)),
            BlockKind::Callout(b) => BlockKind::Callout(CalloutBlock {
                rich_text: runs,
                ..b.clone()
            }),
            BlockKind::Code(b) => BlockKind::Code(CodeBlock {
                rich_text: runs,
                ..b.clone()
            }),
            other => other.clone(),
        }
    }
}

/// A node of a page's content tree.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawBlock")]
pub struct Block {
    pub id: String,
    pub kind: BlockKind,
    pub children: Vec<Block>,
}

/// Wire shape of a block as returned by the Notion API.
#[derive(Deserialize)]
struct RawBlock {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    children: Vec<Block>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl TryFrom<RawBlock> for Block {
    type Error = serde_json::Error;

    fn try_from(mut raw: RawBlock) -> Result<Self, Self::Error> {
        let mut payload = raw
            .rest
            .remove(&raw.kind)
            .unwrap_or_else(|| Value::Object(Map::new()));

        // Children may also arrive nested inside the payload.
        let mut children = raw.children;
        if let Some(nested) = payload.as_object_mut().and_then(|m| m.remove("children")) {
            let nested: Vec<Block> = serde_json::from_value(nested)?;
            children.extend(nested);
        }

        Ok(Block {
            id: raw.id,
            kind: BlockKind::from_payload(&raw.kind, payload),
            children,
        })
    }
}

impl Block {
    pub fn new(id: impl Into<String>, kind: BlockKind) -> Self {
        Self {
            id: id.into(),
            kind,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<Block>) -> Self {
        self.children = children;
        self
    }

    pub fn type_name(&self) -> &str {
        self.kind.type_name()
    }

    /// Concatenated text of the block, when its kind carries rich text.
    pub fn plain_text(&self) -> Option<String> {
        self.kind.rich_text().map(concat_plain_text)
    }

    /// Text worth sending to the translator: present and not only whitespace.
    pub fn translatable_text(&self) -> Option<String> {
        self.plain_text().filter(|text| !text.trim().is_empty())
    }
}

/// A block in the shape accepted by Notion's append-children endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBlock {
    pub kind: String,
    pub body: Value,
    pub children: Vec<WriteBlock>,
}

impl WriteBlock {
    /// Number of blocks in this subtree, itself included.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(WriteBlock::subtree_len).sum::<usize>()
    }

    /// The same block with its children left out.
    pub fn without_children(&self) -> WriteBlock {
        WriteBlock {
            kind: self.kind.clone(),
            body: self.body.clone(),
            children: Vec::new(),
        }
    }
}

impl Serialize for WriteBlock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut body = self.body.clone();
        if !self.children.is_empty() {
            if let Value::Object(map) = &mut body {
                let children = serde_json::to_value(&self.children).map_err(S::Error::custom)?;
                map.insert("children".to_string(), children);
            }
        }

        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("object", "block")?;
        map.serialize_entry("type", &self.kind)?;
        map.serialize_entry(&self.kind, &body)?;
        map.end()
    }
}

fn rich_text_value(runs: &[RichText], override_text: Option<&str>) -> Value {
    match override_text {
        Some(text) => json!([{ "type": "text", "text": { "content": text } }]),
        None => json!(runs),
    }
}

fn text_body(block: &TextBlock, override_text: Option<&str>) -> Value {
    let mut body = json!({ "rich_text": rich_text_value(&block.rich_text, override_text) });
    if let Some(color) = &block.color {
        body["color"] = json!(color);
    }
    if let Some(toggleable) = block.is_toggleable {
        body["is_toggleable"] = json!(toggleable);
    }
    body
}

fn media_body(block: &MediaBlock) -> Value {
    let mut body = match &block.source {
        FileSource::File { file } => json!({ "type": "file", "file": { "url": file.url } }),
        FileSource::External { external } => {
            json!({ "type": "external", "external": { "url": external.url } })
        }
    };
    if !block.caption.is_empty() {
        body["caption"] = json!(block.caption);
    }
    body
}

fn link_body(block: &LinkBlock) -> Value {
    let mut body = json!({ "url": block.url });
    if !block.caption.is_empty() {
        body["caption"] = json!(block.caption);
    }
    body
}

/// Convert a block (and its subtree) into the append-children format.
///
/// With `override_text`, text-bearing blocks get a single plain run holding
/// that text; otherwise their existing runs are written as they are. Media and
/// structural blocks keep only their reference and display attributes, and
/// unsupported blocks are written with their payload unchanged.
pub fn to_creation_format(block: &Block, override_text: Option<&str>) -> WriteBlock {
    let body = match &block.kind {
        BlockKind::Paragraph(b)
        | BlockKind::Heading1(b)
        | BlockKind::Heading2(b)
        | BlockKind::Heading3(b)
        | BlockKind::BulletedListItem(b)
        | BlockKind::NumberedListItem(b)
        | BlockKind::Quote(b)
        | BlockKind::Toggle(b) => text_body(b, override_text),
        BlockKind::Callout(b) => json!({
            "rich_text": rich_text_value(&b.rich_text, override_text),
            "icon": b.icon.clone().unwrap_or_else(|| json!({ "type": "emoji", "emoji": "💡" })),
            "color": b.color.as_deref().unwrap_or("gray_background"),
        }),
        BlockKind::Code(b) => {
            let mut body = json!({
                "rich_text": rich_text_value(&b.rich_text, override_text),
                "language": b.language.as_deref().unwrap_or("plain text"),
            });
            if !b.caption.is_empty() {
                body["caption"] = json!(b.caption);
            }
            body
        }
        BlockKind::Image(b) | BlockKind::Video(b) | BlockKind::File(b) | BlockKind::Pdf(b) => {
            media_body(b)
        }
        BlockKind::Bookmark(b) | BlockKind::Embed(b) => link_body(b),
        BlockKind::LinkPreview(b) => json!({ "url": b.url }),
        BlockKind::Divider => json!({}),
        BlockKind::TableOfContents(b) => {
            json!({ "color": b.color.as_deref().unwrap_or("default") })
        }
        BlockKind::Unsupported { payload, .. } => payload.clone(),
    };

    WriteBlock {
        kind: block.type_name().to_string(),
        body,
        children: block
            .children
            .iter()
            .map(|child| to_creation_format(child, None))
            .collect(),
    }
}
