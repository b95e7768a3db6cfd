//! Journal summary library: totals the time logged under a page's log section.
//! The aggregation core stays pure over fetched data; the outline store, the UI
//! sink and navigation sit behind the `storage` traits.

pub mod core {
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use uuid::Uuid;

    /* ------------------------------- IDs ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct PageId(pub Uuid);

    impl PageId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl fmt::Display for PageId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            self.0.fmt(f)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct BlockId(pub Uuid);

    impl BlockId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl fmt::Display for BlockId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            self.0.fmt(f)
        }
    }

    /* ------------------------------ Outline ------------------------------ */

    /// One block of a page's outline, as handed out by the store.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct OutlineNode {
        pub id: BlockId,
        /// Page the block lives on.
        pub page: PageId,
        pub content: String,

        /// Block properties other than `id::`.
        #[serde(default)]
        pub properties: IndexMap<String, String>,

        /// Pages referenced by this block and its ancestors, in resolution order.
        #[serde(default)]
        pub path_refs: Vec<PageId>,

        #[serde(default)]
        pub children: Vec<OutlineNode>,
    }

    impl OutlineNode {
        pub fn new(page: PageId, content: impl Into<String>) -> Self {
            Self {
                id: BlockId::new(),
                page,
                content: content.into(),
                properties: IndexMap::new(),
                path_refs: vec![],
                children: vec![],
            }
        }

        pub fn with_refs(mut self, refs: impl IntoIterator<Item = PageId>) -> Self {
            self.path_refs.extend(refs);
            self
        }

        pub fn with_children(mut self, children: impl IntoIterator<Item = OutlineNode>) -> Self {
            self.children.extend(children);
            self
        }

        /// Depth-first search for a block in this subtree.
        pub fn find(&self, id: BlockId) -> Option<&OutlineNode> {
            if self.id == id {
                return Some(self);
            }
            self.children.iter().find_map(|c| c.find(id))
        }

        /// Visits this node and every descendant, parents first.
        pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a OutlineNode)) {
            visit(self);
            for c in &self.children {
                c.walk(visit);
            }
        }
    }

    /* ------------------------------- Pages ------------------------------- */

    /// A page as seen through a cross reference.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PageRef {
        pub id: PageId,
        /// Lower-cased page name; this is what navigation targets.
        pub name: String,
        /// Name as first written.
        pub original_name: String,
        pub properties: Option<PageProperties>,
    }

    impl PageRef {
        pub fn new(original_name: impl Into<String>) -> Self {
            let original_name = original_name.into();
            Self {
                id: PageId::new(),
                name: original_name.to_lowercase(),
                original_name,
                properties: None,
            }
        }

        pub fn with_properties(mut self, properties: PageProperties) -> Self {
            self.properties = Some(properties);
            self
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(untagged)]
    pub enum PropertyValue {
        List(Vec<String>),
        Text(String),
    }

    /// Loosely typed page property bag (`key:: value` lines).
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct PageProperties {
        #[serde(flatten)]
        pub props: IndexMap<String, PropertyValue>,
    }

    impl PageProperties {
        /// The declared `tags` list, if the page has one.
        pub fn tags(&self) -> Option<&[String]> {
            match self.props.get("tags") {
                Some(PropertyValue::List(tags)) => Some(tags),
                _ => None,
            }
        }

        pub fn with_tags<I, S>(mut self, tags: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.props.insert(
                "tags".to_string(),
                PropertyValue::List(tags.into_iter().map(Into::into).collect()),
            );
            self
        }
    }

    /* ------------------------------ Results ------------------------------ */

    /// A log entry that carried a time range, with its resolved tag.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ParsedEntry {
        pub tag: String,
        /// Signed: an end before the start is kept as a negative span.
        pub minutes: i64,
    }

    impl ParsedEntry {
        pub fn hours(&self) -> f64 {
            self.minutes as f64 / 60.0
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct UnresolvedRef {
        pub page: PageId,
        pub name: String,
    }

    /// Emitted when an entry falls back to its raw text as the tag.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Diagnostic {
        pub entry: BlockId,
        pub content: String,
        pub references: Vec<UnresolvedRef>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ReportRow {
        pub tag: String,
        pub hours: f64,
    }

    /// Hours per tag, sorted by tag, plus the grand total.
    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    pub struct AggregateReport {
        pub rows: Vec<ReportRow>,
        pub total: f64,
    }

    impl AggregateReport {
        pub fn is_empty(&self) -> bool {
            self.rows.is_empty()
        }

        pub fn tags(&self) -> impl Iterator<Item = &str> {
            self.rows.iter().map(|r| r.tag.as_str())
        }

        pub fn hours_for(&self, tag: &str) -> Option<f64> {
            self.rows.iter().find(|r| r.tag == tag).map(|r| r.hours)
        }
    }

    /// Output of one successful run.
    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    pub struct SummaryRun {
        pub report: AggregateReport,
        #[serde(default)]
        pub diagnostics: Vec<Diagnostic>,
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, thiserror::Error)]
    pub enum SummaryError {
        #[error("\"{keyword}\" not exist")]
        MissingLogSection { keyword: String },
        #[error("block {0} not found")]
        BlockNotFound(BlockId),
        #[error("page {0} not found")]
        PageNotFound(PageId),
        #[error(transparent)]
        Store(#[from] anyhow::Error),
    }
}

pub mod settings {
    //! Plugin settings: the log keyword and how deep entries sit below it.

    use anyhow::{Context, Result};
    use serde::{Deserialize, Serialize};
    use std::{fs, path::Path};

    pub const DEFAULT_KEYWORD: &str = "## Log";
    pub const DEFAULT_NEST: usize = 1;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SummarySettings {
        /// Exact content of the block that holds the log.
        #[serde(default = "SummarySettings::default_keyword")]
        pub keyword: String,

        /// Child levels to descend below the log block before reading entries.
        #[serde(default = "SummarySettings::default_nest")]
        pub nest: usize,
    }

    impl Default for SummarySettings {
        fn default() -> Self {
            Self {
                keyword: Self::default_keyword(),
                nest: Self::default_nest(),
            }
        }
    }

    impl SummarySettings {
        fn default_keyword() -> String {
            DEFAULT_KEYWORD.to_string()
        }

        fn default_nest() -> usize {
            DEFAULT_NEST
        }

        /// Read settings from a JSON file; absent keys keep their defaults.
        pub fn load(path: &Path) -> Result<Self> {
            let raw =
                fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing settings {:?}", path))
        }

        pub fn with_overrides(mut self, keyword: Option<String>, nest: Option<usize>) -> Self {
            if let Some(keyword) = keyword {
                self.keyword = keyword;
            }
            if let Some(nest) = nest {
                self.nest = nest;
            }
            self
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum SettingKind {
        Heading,
        String,
        Number,
    }

    /// One entry of the settings declaration a host shows to the user.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct SettingSchemaItem {
        pub key: String,
        pub title: String,
        #[serde(rename = "type")]
        pub kind: SettingKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub default: Option<serde_json::Value>,
    }

    pub fn settings_schema() -> Vec<SettingSchemaItem> {
        vec![
            SettingSchemaItem {
                key: "settings".to_string(),
                title: "Settings".to_string(),
                kind: SettingKind::Heading,
                default: None,
            },
            SettingSchemaItem {
                key: "keyword".to_string(),
                title: "Log keyword".to_string(),
                kind: SettingKind::String,
                default: Some(serde_json::json!(DEFAULT_KEYWORD)),
            },
            SettingSchemaItem {
                key: "nest".to_string(),
                title: "Log nest".to_string(),
                kind: SettingKind::Number,
                default: Some(serde_json::json!(DEFAULT_NEST)),
            },
        ]
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn missing_keys_fall_back_to_defaults() {
            let s: SummarySettings = serde_json::from_str(r#"{"nest": 2}"#).unwrap();
            assert_eq!(s.keyword, "## Log");
            assert_eq!(s.nest, 2);

            let s: SummarySettings = serde_json::from_str("{}").unwrap();
            assert_eq!(s, SummarySettings::default());
        }

        #[test]
        fn load_reads_json_file() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("settings.json");
            fs::write(&path, r###"{"keyword": "## Done", "nest": 0}"###).expect("write settings");

            let s = SummarySettings::load(&path).expect("load settings");
            assert_eq!(s.keyword, "## Done");
            assert_eq!(s.nest, 0);
        }

        #[test]
        fn load_reports_bad_json() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("settings.json");
            fs::write(&path, r#"{"nest": "deep"}"#).expect("write settings");

            let err = SummarySettings::load(&path).unwrap_err();
            assert!(format!("{err:#}").contains("parsing settings"));
        }

        #[test]
        fn overrides_replace_only_given_values() {
            let s = SummarySettings::default().with_overrides(None, Some(3));
            assert_eq!(s.keyword, DEFAULT_KEYWORD);
            assert_eq!(s.nest, 3);
        }

        #[test]
        fn schema_declares_both_settings() {
            let json = serde_json::to_value(settings_schema()).unwrap();
            assert_eq!(json[0]["type"], "heading");
            assert!(json[0].get("default").is_none());
            assert_eq!(json[1]["key"], "keyword");
            assert_eq!(json[1]["default"], "## Log");
            assert_eq!(json[2]["type"], "number");
            assert_eq!(json[2]["default"], 1);
        }
    }
}

pub mod storage {
    use super::core::{BlockId, OutlineNode, PageId, PageRef};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    /// Read-only view of the outline database.
    #[async_trait]
    pub trait OutlineStore: Send + Sync {
        /// Look up a single block (with its subtree).
        async fn block(&self, id: BlockId) -> Result<Option<OutlineNode>>;

        async fn page(&self, id: PageId) -> Result<Option<PageRef>>;

        /// Top-level blocks of a page, children attached.
        async fn page_blocks_tree(&self, id: PageId) -> Result<Vec<OutlineNode>>;
    }

    /// Markup destined for a rendering slot.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RenderRequest {
        /// Stable per slot; a request replaces earlier content with the same key.
        pub key: String,
        pub slot: String,
        pub template: String,
        pub reset: bool,
    }

    pub trait UiSink {
        fn provide_ui(&mut self, request: RenderRequest);
    }

    /// Side effect for clicking a rendered tag.
    pub trait Navigator {
        fn push_page(&mut self, name: &str) -> Result<()>;
    }
}

pub mod parser {
    //! `nom` parsers for time ranges, tag codes, renderer macros and
    //! markdown outline pages.
    //!
    //! Pages are read line by line: leading `key:: value` lines are page
    //! properties, `- ` bullets open blocks whose nesting follows indentation,
    //! anything else continues the previous block.

    use crate::core::{BlockId, PageProperties, PropertyValue};
    use anyhow::{Context, Result};
    use indexmap::IndexMap;
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_until, take_while, take_while1, take_while_m_n},
        character::complete::{char, space0},
        combinator::{all_consuming, map, map_res, rest},
        error::VerboseError,
        sequence::{delimited, preceded, separated_pair, terminated, tuple},
    };
    use uuid::Uuid;

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /* ----------------------------- Time ranges ----------------------------- */

    /// A clock reading as written. Not validated: `99:99` is accepted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClockTime {
        pub hour: u32,
        pub minute: u32,
    }

    impl ClockTime {
        pub fn minutes_since_midnight(self) -> i64 {
            i64::from(self.hour) * 60 + i64::from(self.minute)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimeRange {
        pub start: ClockTime,
        pub end: ClockTime,
    }

    impl TimeRange {
        /// End minus start; negative when the end is earlier.
        pub fn elapsed_minutes(&self) -> i64 {
            self.end.minutes_since_midnight() - self.start.minutes_since_midnight()
        }
    }

    /// First `HH:MM - HH:MM` range anywhere in `text`.
    pub fn find_time_range(text: &str) -> Option<TimeRange> {
        text.char_indices()
            .find_map(|(idx, _)| time_range(&text[idx..]).ok().map(|(_, r)| r))
    }

    pub fn elapsed_minutes(text: &str) -> Option<i64> {
        find_time_range(text).map(|r| r.elapsed_minutes())
    }

    fn two_digits(i: &str) -> PResult<'_, u32> {
        map_res(take_while_m_n(2, 2, |c: char| c.is_ascii_digit()), |s: &str| {
            s.parse::<u32>()
        })(i)
    }

    fn clock_time(i: &str) -> PResult<'_, ClockTime> {
        map(
            separated_pair(two_digits, char(':'), two_digits),
            |(hour, minute)| ClockTime { hour, minute },
        )(i)
    }

    fn gap(i: &str) -> PResult<'_, &str> {
        take_while(char::is_whitespace)(i)
    }

    fn time_range(i: &str) -> PResult<'_, TimeRange> {
        map(
            separated_pair(clock_time, delimited(gap, char('-'), gap), clock_time),
            |(start, end)| TimeRange { start, end },
        )(i)
    }

    /* ------------------------------ Tag codes ------------------------------ */

    /// Returns `s` when it is exactly three ASCII digits.
    pub fn tag_code(s: &str) -> Option<&str> {
        all_consuming(take_while_m_n::<_, _, VerboseError<&str>>(3, 3, |c: char| {
            c.is_ascii_digit()
        }))(s)
        .ok()
        .map(|(_, code)| code)
    }

    /* ---------------------------- Renderer macros ---------------------------- */

    /// Arguments of every `{{renderer a, b}}` macro in `text`.
    pub fn renderer_macros(text: &str) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        let mut i = text;
        while !i.is_empty() {
            if let Ok((r, args)) = renderer_macro(i) {
                out.push(args);
                i = r;
                continue;
            }
            let mut chars = i.chars();
            chars.next();
            i = chars.as_str();
        }
        out
    }

    fn renderer_macro(i: &str) -> PResult<'_, Vec<String>> {
        map(
            delimited(
                tuple((tag("{{"), space0, tag("renderer"))),
                take_until("}}"),
                tag("}}"),
            ),
            |args: &str| {
                args.split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(str::to_string)
                    .collect()
            },
        )(i)
    }

    /* ------------------------------ References ------------------------------ */

    /// Page names referenced by `[[Page]]`, `#[[Page]]` and `#tag`, in order.
    pub fn parse_refs(text: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut i = text;
        let mut at_boundary = true;
        while !i.is_empty() {
            let attempt = if at_boundary {
                alt((bracketed_ref, hash_bracketed_ref, hash_tag))(i)
            } else {
                bracketed_ref(i)
            };
            match attempt {
                Ok((r, name)) => {
                    let name = name.trim();
                    if !name.is_empty() {
                        out.push(name.to_string());
                    }
                    i = r;
                    at_boundary = false;
                }
                Err(_) => {
                    let mut chars = i.chars();
                    let c = chars.next().unwrap_or(' ');
                    at_boundary = c.is_whitespace();
                    i = chars.as_str();
                }
            }
        }
        out
    }

    fn bracketed_ref(i: &str) -> PResult<'_, &str> {
        delimited(tag("[["), take_until("]]"), tag("]]"))(i)
    }

    fn hash_bracketed_ref(i: &str) -> PResult<'_, &str> {
        preceded(char('#'), bracketed_ref)(i)
    }

    fn hash_tag(i: &str) -> PResult<'_, &str> {
        preceded(
            char('#'),
            take_while1(|c: char| {
                !c.is_whitespace() && !matches!(c, '#' | ',' | '.' | '!' | '?' | ';' | '"' | ')' | ']')
            }),
        )(i)
    }

    /* -------------------------------- Pages -------------------------------- */

    /// A page as read from markdown, before references become page ids.
    #[derive(Debug, Clone, PartialEq, Eq, Default)]
    pub struct ParsedPage {
        /// From a `title::` property.
        pub title: Option<String>,
        pub properties: PageProperties,
        pub blocks: Vec<ParsedBlock>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Default)]
    pub struct ParsedBlock {
        pub id: Option<BlockId>,
        pub content: String,
        pub properties: IndexMap<String, String>,
        /// Referenced page names, in order of appearance.
        pub refs: Vec<String>,
        pub children: Vec<ParsedBlock>,
    }

    /// Parse a markdown outline page.
    pub fn parse_page_from_str(input: &str) -> Result<ParsedPage> {
        let mut page = ParsedPage::default();
        let mut stack: Vec<(usize, ParsedBlock)> = Vec::new();
        let mut in_preamble = true;

        for (lineno, line) in input.lines().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.trim().is_empty() {
                continue;
            }
            let indent = indent_width(line);

            if let Some(content) = bullet(trimmed) {
                in_preamble = false;
                while stack.last().is_some_and(|(depth, _)| *depth >= indent) {
                    close_top(&mut stack, &mut page.blocks);
                }
                stack.push((
                    indent,
                    ParsedBlock {
                        content: content.to_string(),
                        ..ParsedBlock::default()
                    },
                ));
                continue;
            }

            let property = property_line(trimmed).ok().map(|(_, kv)| kv);
            if in_preamble {
                if let Some((key, value)) = property {
                    insert_page_property(&mut page, key, value);
                }
                continue;
            }

            let Some((_, block)) = stack.last_mut() else {
                continue;
            };
            match property {
                Some(("id", value)) => {
                    let uuid = Uuid::parse_str(value.trim())
                        .with_context(|| format!("line {}: invalid block id", lineno + 1))?;
                    block.id = Some(BlockId(uuid));
                }
                Some((key, value)) => {
                    block
                        .properties
                        .insert(key.to_string(), value.trim().to_string());
                }
                None => {
                    block.content.push('\n');
                    block.content.push_str(trimmed.trim_end());
                }
            }
        }

        while !stack.is_empty() {
            close_top(&mut stack, &mut page.blocks);
        }
        Ok(page)
    }

    fn close_top(stack: &mut Vec<(usize, ParsedBlock)>, roots: &mut Vec<ParsedBlock>) {
        if let Some((_, mut block)) = stack.pop() {
            block.refs = parse_refs(&block.content);
            match stack.last_mut() {
                Some((_, parent)) => parent.children.push(block),
                None => roots.push(block),
            }
        }
    }

    fn indent_width(line: &str) -> usize {
        line.chars()
            .take_while(|c| c.is_whitespace())
            .map(|c| if c == '\t' { 2 } else { 1 })
            .sum()
    }

    fn bullet(trimmed: &str) -> Option<&str> {
        if trimmed.trim_end() == "-" {
            return Some("");
        }
        trimmed.strip_prefix("- ").map(|s| s.trim_end())
    }

    fn property_line(i: &str) -> PResult<'_, (&str, &str)> {
        all_consuming(separated_pair(
            take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            terminated(tag("::"), space0),
            rest,
        ))(i.trim_end())
    }

    fn insert_page_property(page: &mut ParsedPage, key: &str, value: &str) {
        let key = key.to_ascii_lowercase();
        let value = value.trim();
        let parsed = match key.as_str() {
            "tags" | "alias" => PropertyValue::List(split_list(value)),
            "title" => {
                page.title = Some(value.to_string());
                PropertyValue::Text(value.to_string())
            }
            _ => PropertyValue::Text(value.to_string()),
        };
        page.properties.props.insert(key, parsed);
    }

    fn split_list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(|item| {
                let item = item.trim();
                let item = item.strip_prefix('#').unwrap_or(item);
                item.strip_prefix("[[")
                    .and_then(|s| s.strip_suffix("]]"))
                    .unwrap_or(item)
                    .trim()
                    .to_string()
            })
            .filter(|item| !item.is_empty())
            .collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn elapsed_minutes_from_ranges() {
            assert_eq!(elapsed_minutes("09:00 - 10:30"), Some(90));
            assert_eq!(elapsed_minutes("14:05-14:50"), Some(45));
            assert_eq!(elapsed_minutes("standup 10:00\t-  10:15 [[042]]"), Some(15));
            assert_eq!(elapsed_minutes("10:00 - 10:00"), Some(0));
        }

        #[test]
        fn ranges_are_not_validated_or_corrected() {
            assert_eq!(elapsed_minutes("00:00 - 99:99"), Some(99 * 60 + 99));
            assert_eq!(elapsed_minutes("23:30 - 00:30"), Some(-1380));
        }

        #[test]
        fn only_first_range_counts() {
            assert_eq!(elapsed_minutes("08:00 - 09:00, then 13:00 - 17:00"), Some(60));
        }

        #[test]
        fn range_can_start_mid_token() {
            // "109:00" has no range at its first digit but does one later.
            assert_eq!(elapsed_minutes("109:00-10:00"), Some(60));
            assert_eq!(elapsed_minutes("12:345 - 13:00"), None);
        }

        #[test]
        fn text_without_range_yields_none() {
            assert_eq!(elapsed_minutes("lunch"), None);
            assert_eq!(elapsed_minutes("9:00 - 10:00"), None);
            assert_eq!(elapsed_minutes("09:00 to 10:00"), None);
            assert_eq!(elapsed_minutes("０９:００ - 10:00"), None);
            assert_eq!(elapsed_minutes(""), None);
        }

        #[test]
        fn tag_codes_are_exactly_three_digits() {
            assert_eq!(tag_code("042"), Some("042"));
            assert_eq!(tag_code("42"), None);
            assert_eq!(tag_code("0420"), None);
            assert_eq!(tag_code("04a"), None);
            assert_eq!(tag_code("042\n"), None);
            assert_eq!(tag_code(""), None);
        }

        #[test]
        fn finds_renderer_macros() {
            let found = renderer_macros("before {{renderer journal-summary}} and {{renderer other, x}}");
            assert_eq!(
                found,
                vec![
                    vec!["journal-summary".to_string()],
                    vec!["other".to_string(), "x".to_string()],
                ]
            );
            assert!(renderer_macros("{{query (todo now)}}").is_empty());
        }

        #[test]
        fn refs_in_order() {
            let refs = parse_refs("09:00 - 10:00 [[Project A]] with #meeting and #[[Deep Work]]");
            assert_eq!(refs, vec!["Project A", "meeting", "Deep Work"]);
        }

        #[test]
        fn headings_and_inline_hashes_are_not_tags() {
            assert!(parse_refs("## Log").is_empty());
            assert!(parse_refs("# Title").is_empty());
            assert!(parse_refs("learning C#").is_empty());
            assert_eq!(parse_refs("#042, done"), vec!["042"]);
        }

        #[test]
        fn parses_page_properties_and_tree() {
            let text = "\
tags:: 042, [[client]]
title:: Project A

- ## Log
  - [[Project A]]
    - 09:00 - 10:30 standup
      id:: 6f1d1e46-9c39-4c1e-9a4a-0d7a8d8e2f11
      note:: brought coffee
    - 10:30 - 11:00
      follow-up call
- {{renderer journal-summary}}
";
            let page = parse_page_from_str(text).expect("parse page");
            assert_eq!(page.title.as_deref(), Some("Project A"));
            assert_eq!(
                page.properties.tags(),
                Some(&["042".to_string(), "client".to_string()][..])
            );

            assert_eq!(page.blocks.len(), 2);
            let log = &page.blocks[0];
            assert_eq!(log.content, "## Log");
            assert!(log.refs.is_empty());

            let project = &log.children[0];
            assert_eq!(project.refs, vec!["Project A"]);
            assert_eq!(project.children.len(), 2);

            let first = &project.children[0];
            assert_eq!(first.content, "09:00 - 10:30 standup");
            assert_eq!(
                first.id.map(|id| id.to_string()).as_deref(),
                Some("6f1d1e46-9c39-4c1e-9a4a-0d7a8d8e2f11")
            );
            assert_eq!(first.properties.get("note").map(String::as_str), Some("brought coffee"));

            assert_eq!(project.children[1].content, "10:30 - 11:00\nfollow-up call");
            assert_eq!(page.blocks[1].content, "{{renderer journal-summary}}");
        }

        #[test]
        fn tab_indentation_nests() {
            let page = parse_page_from_str("- a\n\t- b\n\t\t- c\n\t- d\n- e\n").unwrap();
            assert_eq!(page.blocks.len(), 2);
            assert_eq!(page.blocks[0].children.len(), 2);
            assert_eq!(page.blocks[0].children[0].children[0].content, "c");
            assert_eq!(page.blocks[1].content, "e");
        }

        #[test]
        fn bad_block_id_is_an_error() {
            let err = parse_page_from_str("- a\n  id:: not-a-uuid\n").unwrap_err();
            assert!(format!("{err:#}").contains("line 2"));
        }

        #[test]
        fn properties_only_page_has_no_blocks() {
            let page = parse_page_from_str("tags:: 001\n").unwrap();
            assert!(page.blocks.is_empty());
            assert_eq!(page.properties.tags(), Some(&["001".to_string()][..]));
        }
    }
}

pub mod graph {
    //! In-memory outline store, loadable from a directory of markdown pages.

    use crate::core::{BlockId, OutlineNode, PageId, PageProperties, PageRef};
    use crate::host::RENDERER_TYPE;
    use crate::parser::{ParsedBlock, ParsedPage, parse_page_from_str, renderer_macros};
    use crate::storage::OutlineStore;
    use anyhow::{Context, Result};
    use async_trait::async_trait;
    use indexmap::{IndexMap, IndexSet};
    use std::{
        fs,
        path::{Path, PathBuf},
    };
    use tracing::debug;

    #[derive(Debug, Clone, Default)]
    pub struct MemoryGraph {
        pages: IndexMap<PageId, PageRef>,
        by_name: IndexMap<String, PageId>,
        trees: IndexMap<PageId, Vec<OutlineNode>>,
    }

    impl MemoryGraph {
        pub fn new() -> Self {
            Self::default()
        }

        /// Load one `.md` file or every `.md` file below a directory.
        pub fn load_path(path: &Path) -> Result<Self> {
            let mut graph = Self::new();
            for file in collect_markdown_files(path)? {
                graph.load_file(&file)?;
            }
            Ok(graph)
        }

        pub fn load_file(&mut self, path: &Path) -> Result<PageId> {
            debug!(?path, "loading page");
            let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
            let parsed = parse_page_from_str(&text).with_context(|| format!("parsing {:?}", path))?;
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .with_context(|| format!("{:?} has no file name", path))?;
            Ok(self.add_parsed_page(&stem, parsed))
        }

        /// Add a parsed page; a `title::` property takes precedence over `name`.
        pub fn add_parsed_page(&mut self, name: &str, parsed: ParsedPage) -> PageId {
            let ParsedPage {
                title,
                properties,
                blocks,
            } = parsed;
            let name = title.as_deref().unwrap_or(name);
            let properties = (!properties.props.is_empty()).then_some(properties);
            self.insert_page(name, properties, blocks)
        }

        pub fn insert_page(
            &mut self,
            name: &str,
            properties: Option<PageProperties>,
            blocks: Vec<ParsedBlock>,
        ) -> PageId {
            let page = self.intern_page(name);
            if let Some(props) = properties {
                if let Some(p) = self.pages.get_mut(&page) {
                    p.properties = Some(props);
                }
            }
            let tree = self.build_nodes(page, blocks, &[]);
            self.trees.insert(page, tree);
            page
        }

        /// Id of the page named `name` (case-insensitive), creating it if needed.
        pub fn intern_page(&mut self, name: &str) -> PageId {
            let key = name.to_lowercase();
            if let Some(id) = self.by_name.get(&key) {
                return *id;
            }
            let page = PageRef::new(name);
            let id = page.id;
            self.by_name.insert(key, id);
            self.pages.insert(id, page);
            id
        }

        pub fn page_by_name(&self, name: &str) -> Option<&PageRef> {
            self.by_name
                .get(&name.to_lowercase())
                .and_then(|id| self.pages.get(id))
        }

        pub fn pages(&self) -> impl Iterator<Item = &PageRef> {
            self.pages.values()
        }

        /// Pages that have content (not only referenced).
        pub fn loaded_pages(&self) -> impl Iterator<Item = (&PageRef, &[OutlineNode])> {
            self.trees
                .iter()
                .filter_map(|(id, tree)| self.pages.get(id).map(|p| (p, tree.as_slice())))
        }

        pub fn tree(&self, page: PageId) -> Option<&[OutlineNode]> {
            self.trees.get(&page).map(Vec::as_slice)
        }

        pub fn find_block(&self, id: BlockId) -> Option<&OutlineNode> {
            self.trees
                .values()
                .flat_map(|tree| tree.iter())
                .find_map(|root| root.find(id))
        }

        /// Blocks carrying a journal-summary renderer macro, optionally on one page only.
        pub fn marker_blocks(&self, page: Option<PageId>) -> Vec<&OutlineNode> {
            let mut out = Vec::new();
            for (id, tree) in &self.trees {
                if page.is_some_and(|p| p != *id) {
                    continue;
                }
                for root in tree {
                    root.walk(&mut |node| {
                        let is_marker = renderer_macros(&node.content)
                            .iter()
                            .any(|args| args.first().map(String::as_str) == Some(RENDERER_TYPE));
                        if is_marker {
                            out.push(node);
                        }
                    });
                }
            }
            out
        }

        fn build_nodes(
            &mut self,
            page: PageId,
            blocks: Vec<ParsedBlock>,
            ancestors: &[Vec<PageId>],
        ) -> Vec<OutlineNode> {
            let mut out = Vec::with_capacity(blocks.len());
            for block in blocks {
                let own: Vec<PageId> = block.refs.iter().map(|r| self.intern_page(r)).collect();

                // Own refs first, then nearest ancestor outwards, then the page.
                let mut path_refs: IndexSet<PageId> = own.iter().copied().collect();
                for level in ancestors.iter().rev() {
                    path_refs.extend(level.iter().copied());
                }
                path_refs.insert(page);

                let mut lineage = ancestors.to_vec();
                lineage.push(own);
                let children = self.build_nodes(page, block.children, &lineage);

                out.push(OutlineNode {
                    id: block.id.unwrap_or_else(BlockId::new),
                    page,
                    content: block.content,
                    properties: block.properties,
                    path_refs: path_refs.into_iter().collect(),
                    children,
                });
            }
            out
        }
    }

    #[async_trait]
    impl OutlineStore for MemoryGraph {
        async fn block(&self, id: BlockId) -> Result<Option<OutlineNode>> {
            Ok(self.find_block(id).cloned())
        }

        async fn page(&self, id: PageId) -> Result<Option<PageRef>> {
            Ok(self.pages.get(&id).cloned())
        }

        async fn page_blocks_tree(&self, id: PageId) -> Result<Vec<OutlineNode>> {
            Ok(self.trees.get(&id).cloned().unwrap_or_default())
        }
    }

    fn collect_markdown_files(path: &Path) -> Result<Vec<PathBuf>> {
        let meta = fs::metadata(path).with_context(|| format!("reading metadata for {:?}", path))?;
        let mut out = Vec::new();
        if meta.is_dir() {
            visit_dir(path, &mut out)?;
            out.sort();
        } else if is_markdown(path) {
            out.push(path.to_path_buf());
        } else {
            anyhow::bail!("{:?} is not a markdown file", path);
        }
        Ok(out)
    }

    fn visit_dir(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(dir).with_context(|| format!("listing {:?}", dir))? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if file_type.is_symlink() || hidden {
                continue;
            }
            if file_type.is_dir() {
                visit_dir(&path, out)?;
            } else if is_markdown(&path) {
                out.push(path);
            }
        }
        Ok(())
    }

    fn is_markdown(path: &Path) -> bool {
        path.extension().map(|ext| ext == "md").unwrap_or(false)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        fn graph_from(pages: &[(&str, &str)]) -> MemoryGraph {
            let mut g = MemoryGraph::new();
            for (name, text) in pages {
                g.add_parsed_page(name, parse_page_from_str(text).unwrap());
            }
            g
        }

        #[test]
        fn path_refs_run_from_block_to_page() {
            let g = graph_from(&[(
                "2025_01_15",
                "- ## Log\n  - [[Client]] work\n    - 09:00 - 10:00 #042\n",
            )]);
            let page = g.page_by_name("2025_01_15").unwrap().id;
            let client = g.page_by_name("client").unwrap().id;
            let tag = g.page_by_name("042").unwrap().id;

            let tree = g.tree(page).unwrap();
            let entry = &tree[0].children[0].children[0];
            assert_eq!(entry.path_refs, vec![tag, client, page]);
            assert_eq!(tree[0].path_refs, vec![page]);
        }

        #[test]
        fn referenced_pages_are_shared_case_insensitively() {
            let g = graph_from(&[
                ("a", "- [[Deep Work]]\n"),
                ("b", "- [[deep work]]\n"),
            ]);
            let page = g.page_by_name("DEEP WORK").unwrap();
            assert_eq!(page.name, "deep work");
            assert_eq!(page.original_name, "Deep Work");
            assert_eq!(g.pages().filter(|p| p.name == "deep work").count(), 1);
        }

        #[test]
        fn loading_a_page_fills_in_earlier_reference() {
            let g = graph_from(&[
                ("journal", "- 09:00 - 10:00 [[Client]]\n"),
                ("Client", "tags:: 007\n\n- notes\n"),
            ]);
            let client = g.page_by_name("client").unwrap();
            let tags = client.properties.as_ref().and_then(|p| p.tags());
            assert_eq!(tags, Some(&["007".to_string()][..]));
        }

        #[test]
        fn title_property_names_the_page() {
            let g = graph_from(&[("file-name", "title:: Real Name\n- x\n")]);
            assert!(g.page_by_name("real name").is_some());
            assert!(g.page_by_name("file-name").is_none());
        }

        #[test]
        fn finds_marker_blocks() {
            let g = graph_from(&[
                ("a", "- {{renderer journal-summary}}\n- {{renderer other}}\n"),
                ("b", "- x\n  - {{renderer journal-summary}}\n"),
            ]);
            assert_eq!(g.marker_blocks(None).len(), 2);
            let a = g.page_by_name("a").unwrap().id;
            assert_eq!(g.marker_blocks(Some(a)).len(), 1);
        }

        #[test]
        fn loads_directory_tree() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let journals = tmp.path().join("journals");
            let pages = tmp.path().join("pages");
            fs::create_dir_all(&journals).expect("mkdir journals");
            fs::create_dir_all(&pages).expect("mkdir pages");
            fs::create_dir_all(tmp.path().join(".recycle")).expect("mkdir hidden");
            fs::write(journals.join("2025_01_15.md"), "- ## Log\n  - 09:00 - 10:00 [[Alpha]]\n")
                .expect("write journal");
            fs::write(pages.join("Alpha.md"), "tags:: 100\n- about alpha\n").expect("write page");
            fs::write(pages.join("notes.txt"), "ignored").expect("write txt");
            fs::write(tmp.path().join(".recycle/old.md"), "- gone\n").expect("write hidden");

            let g = MemoryGraph::load_path(tmp.path()).expect("load graph");
            assert_eq!(g.loaded_pages().count(), 2);
            assert!(g.page_by_name("old").is_none());
            assert!(g.page_by_name("alpha").unwrap().properties.is_some());
        }

        #[test]
        fn rejects_non_markdown_file() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("notes.txt");
            fs::write(&path, "- x\n").expect("write");
            assert!(MemoryGraph::load_path(&path).is_err());
        }
    }
}

pub mod summary {
    //! The aggregation pipeline: locate the log, flatten, parse, resolve, fold.

    use crate::core::*;
    use crate::parser::{elapsed_minutes, tag_code};
    use crate::settings::SummarySettings;
    use crate::storage::OutlineStore;
    use futures::future::try_join_all;
    use indexmap::IndexMap;
    use tracing::{debug, warn};

    /// The first top-level block whose content equals `keyword`.
    pub fn locate_log_section<'a>(
        tree: &'a [OutlineNode],
        keyword: &str,
    ) -> Result<&'a OutlineNode, SummaryError> {
        tree.iter()
            .find(|node| node.content == keyword)
            .ok_or_else(|| SummaryError::MissingLogSection {
                keyword: keyword.to_string(),
            })
    }

    /// Descend `nest` levels; each round replaces the list with all children.
    pub fn flatten(nodes: &[OutlineNode], nest: usize) -> Vec<&OutlineNode> {
        let mut current: Vec<&OutlineNode> = nodes.iter().collect();
        for _ in 0..nest {
            current = current
                .into_iter()
                .flat_map(|node| node.children.iter())
                .collect();
        }
        current
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Resolution {
        pub tag: String,
        pub diagnostic: Option<Diagnostic>,
    }

    /// Pick the entry's tag from its already fetched reference pages.
    ///
    /// A three-digit page name wins, then a three-digit value from a page's
    /// `tags` list, then the entry's own text.
    pub fn resolve_from_pages(node: &OutlineNode, pages: &[PageRef]) -> Resolution {
        let direct = pages.iter().find_map(|page| tag_code(&page.name));
        let from_properties = pages
            .iter()
            .filter_map(|page| page.properties.as_ref()?.tags())
            .flatten()
            .find_map(|t| tag_code(t));

        match direct.or(from_properties) {
            Some(tag) => Resolution {
                tag: tag.to_string(),
                diagnostic: None,
            },
            None => Resolution {
                tag: node.content.clone(),
                diagnostic: Some(Diagnostic {
                    entry: node.id,
                    content: node.content.clone(),
                    references: pages
                        .iter()
                        .map(|page| UnresolvedRef {
                            page: page.id,
                            name: page.name.clone(),
                        })
                        .collect(),
                }),
            },
        }
    }

    pub async fn fetch_page<S>(store: &S, id: PageId) -> Result<PageRef, SummaryError>
    where
        S: OutlineStore + ?Sized,
    {
        store.page(id).await?.ok_or(SummaryError::PageNotFound(id))
    }

    /// Fetch every referenced page (one request per reference) and resolve.
    pub async fn resolve_tag<S>(store: &S, node: &OutlineNode) -> Result<Resolution, SummaryError>
    where
        S: OutlineStore + ?Sized,
    {
        let mut pages = Vec::with_capacity(node.path_refs.len());
        for id in &node.path_refs {
            pages.push(fetch_page(store, *id).await?);
        }
        Ok(resolve_from_pages(node, &pages))
    }

    /// `None` when the entry has no time range.
    pub async fn parse_entry<S>(
        store: &S,
        node: &OutlineNode,
    ) -> Result<Option<(ParsedEntry, Option<Diagnostic>)>, SummaryError>
    where
        S: OutlineStore + ?Sized,
    {
        let Some(minutes) = elapsed_minutes(&node.content) else {
            return Ok(None);
        };
        let Resolution { tag, diagnostic } = resolve_tag(store, node).await?;
        Ok(Some((ParsedEntry { tag, minutes }, diagnostic)))
    }

    /// Sum hours per tag and order rows by tag.
    pub fn aggregate<'a>(entries: impl IntoIterator<Item = &'a ParsedEntry>) -> AggregateReport {
        let mut totals: IndexMap<&str, f64> = IndexMap::new();
        for entry in entries {
            *totals.entry(entry.tag.as_str()).or_insert(0.0) += entry.hours();
        }
        // Code point order; tags outside the BMP sort after U+E000..=U+FFFF.
        totals.sort_by(|a, _, b, _| a.cmp(b));

        let rows: Vec<ReportRow> = totals
            .into_iter()
            .map(|(tag, hours)| ReportRow {
                tag: tag.to_string(),
                hours,
            })
            .collect();
        let total = rows.iter().map(|r| r.hours).sum();
        AggregateReport { rows, total }
    }

    /// Run the pipeline over a page's top-level blocks.
    pub async fn summarize_tree<S>(
        store: &S,
        settings: &SummarySettings,
        tree: &[OutlineNode],
    ) -> Result<SummaryRun, SummaryError>
    where
        S: OutlineStore + ?Sized,
    {
        let log = locate_log_section(tree, &settings.keyword)?;
        let candidates = flatten(&log.children, settings.nest);
        debug!(
            log = %log.id,
            nest = settings.nest,
            candidates = candidates.len(),
            "summarizing log section"
        );

        let parsed = try_join_all(candidates.into_iter().map(|node| parse_entry(store, node))).await?;

        let mut entries = Vec::with_capacity(parsed.len());
        let mut diagnostics = Vec::new();
        for (entry, diagnostic) in parsed.into_iter().flatten() {
            entries.push(entry);
            diagnostics.extend(diagnostic);
        }
        for d in &diagnostics {
            warn!(
                entry = %d.entry,
                content = %d.content,
                references = ?d.references,
                "no tag code found, using entry text"
            );
        }

        Ok(SummaryRun {
            report: aggregate(&entries),
            diagnostics,
        })
    }

    pub async fn summarize_page<S>(
        store: &S,
        settings: &SummarySettings,
        page: PageId,
    ) -> Result<SummaryRun, SummaryError>
    where
        S: OutlineStore + ?Sized,
    {
        let tree = store.page_blocks_tree(page).await?;
        summarize_tree(store, settings, &tree).await
    }

    /// Summarize the page that holds `block` (the block carrying the marker).
    pub async fn summarize_block<S>(
        store: &S,
        settings: &SummarySettings,
        block: BlockId,
    ) -> Result<SummaryRun, SummaryError>
    where
        S: OutlineStore + ?Sized,
    {
        let node = store
            .block(block)
            .await?
            .ok_or(SummaryError::BlockNotFound(block))?;
        let page = fetch_page(store, node.page).await?;
        summarize_page(store, settings, page.id).await
    }

}

pub mod format {
    //! Markup for a slot: the summary table, or the error that replaced it.

    use crate::core::{AggregateReport, BlockId, SummaryError, SummaryRun};
    use crate::host::{JUMP_TAG, RENDERER_TYPE};
    use crate::storage::RenderRequest;
    use std::fmt::Write;

    /// Where the markup lands.
    #[derive(Debug, Clone, Copy)]
    pub struct SlotContext<'a> {
        pub slot: &'a str,
        pub block: Option<BlockId>,
    }

    pub fn render_key(slot: &str) -> String {
        format!("{RENDERER_TYPE}-{slot}")
    }

    pub fn render_report(report: &AggregateReport, ctx: SlotContext<'_>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "<table {}>", slot_attrs(ctx));
        out.push_str("  <thead>\n    <tr>\n      <th>Tag</th>\n      <th>Time</th>\n    </tr>\n  </thead>\n");
        out.push_str("  <tbody>\n");
        for row in &report.rows {
            let tag = escape_html(&row.tag);
            let _ = writeln!(
                out,
                "    <tr>\n      <td><a data-on-click=\"{JUMP_TAG}\" data-ref=\"{tag}\" class=\"tag\">{tag}</a></td>\n      <td>{}</td>\n    </tr>",
                row.hours
            );
        }
        out.push_str("  </tbody>\n");
        let _ = writeln!(
            out,
            "  <tfoot>\n    <tr>\n      <td><b>Total</b></td>\n      <td><b>{}</b></td>\n    </tr>\n  </tfoot>",
            report.total
        );
        out.push_str("</table>\n");
        out
    }

    pub fn render_error(err: &SummaryError, ctx: SlotContext<'_>) -> String {
        format!(
            "<div {}>Error: {}</div>\n",
            slot_attrs(ctx),
            escape_html(&err.to_string())
        )
    }

    /// Full replacement for the slot: the table on success, the error otherwise.
    pub fn render_outcome(
        outcome: &Result<SummaryRun, SummaryError>,
        ctx: SlotContext<'_>,
    ) -> RenderRequest {
        let template = match outcome {
            Ok(run) => render_report(&run.report, ctx),
            Err(err) => render_error(err, ctx),
        };
        RenderRequest {
            key: render_key(ctx.slot),
            slot: ctx.slot.to_string(),
            template,
            reset: true,
        }
    }

    /// Plain aligned table for terminals.
    pub fn render_text(report: &AggregateReport) -> String {
        let hours: Vec<String> = report.rows.iter().map(|r| r.hours.to_string()).collect();
        let total = report.total.to_string();

        let tag_width = report
            .rows
            .iter()
            .map(|r| r.tag.chars().count())
            .chain(["Tag".len(), "Total".len()])
            .max()
            .unwrap_or(0);
        let time_width = hours
            .iter()
            .map(String::len)
            .chain(["Time".len(), total.len()])
            .max()
            .unwrap_or(0);

        let mut out = String::new();
        let _ = writeln!(out, "{:<tag_width$}  {:>time_width$}", "Tag", "Time");
        let _ = writeln!(out, "{}  {}", "-".repeat(tag_width), "-".repeat(time_width));
        for (row, h) in report.rows.iter().zip(&hours) {
            let _ = writeln!(out, "{:<tag_width$}  {:>time_width$}", row.tag, h);
        }
        let _ = writeln!(out, "{}  {}", "-".repeat(tag_width), "-".repeat(time_width));
        let _ = writeln!(out, "{:<tag_width$}  {:>time_width$}", "Total", total);
        out
    }

    fn slot_attrs(ctx: SlotContext<'_>) -> String {
        let mut attrs = format!("data-slot-id=\"{}\"", escape_html(ctx.slot));
        if let Some(block) = ctx.block {
            let _ = write!(attrs, " data-block-uuid=\"{block}\"");
        }
        attrs
    }

    fn escape_html(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                _ => out.push(c),
            }
        }
        out
    }

}

pub mod host {
    //! Glue for a note-taking host: the renderer macro trigger, the click
    //! model, and an in-memory sink that keeps the latest render per key.

    use crate::core::{BlockId, SummaryError, SummaryRun};
    use crate::format::{SlotContext, render_outcome};
    use crate::settings::SummarySettings;
    use crate::storage::{Navigator, OutlineStore, RenderRequest, UiSink};
    use crate::summary::summarize_block;
    use anyhow::{Result, bail};
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use tracing::{debug, warn};

    pub const RENDERER_TYPE: &str = "journal-summary";
    pub const JUMP_TAG: &str = "jumpTag";

    /// Text the slash command inserts at the cursor.
    pub fn renderer_macro() -> String {
        format!("{{{{renderer {RENDERER_TYPE}}}}}")
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct MacroPayload {
        pub arguments: Vec<String>,
        /// Block that contains the macro.
        pub uuid: BlockId,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SlotEvent {
        pub slot: String,
        pub payload: MacroPayload,
    }

    impl SlotEvent {
        pub fn for_block(slot: impl Into<String>, block: BlockId) -> Self {
            Self {
                slot: slot.into(),
                payload: MacroPayload {
                    arguments: vec![RENDERER_TYPE.to_string()],
                    uuid: block,
                },
            }
        }
    }

    /// Handle a rendered macro. Returns `None` for other renderer types.
    pub async fn on_macro_renderer_slotted<S, U>(
        store: &S,
        settings: &SummarySettings,
        sink: &mut U,
        event: &SlotEvent,
    ) -> Option<Result<SummaryRun, SummaryError>>
    where
        S: OutlineStore + ?Sized,
        U: UiSink + ?Sized,
    {
        if event.payload.arguments.first().map(String::as_str) != Some(RENDERER_TYPE) {
            return None;
        }
        debug!(slot = %event.slot, block = %event.payload.uuid, "journal summary slotted");

        let outcome = summarize_block(store, settings, event.payload.uuid).await;
        if let Err(err) = &outcome {
            warn!(slot = %event.slot, error = %err, "journal summary failed");
        }
        let ctx = SlotContext {
            slot: &event.slot,
            block: Some(event.payload.uuid),
        };
        sink.provide_ui(render_outcome(&outcome, ctx));
        Some(outcome)
    }

    /// A click on rendered markup: the `data-on-click` action and `data-ref`.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ClickEvent {
        pub action: String,
        pub data_ref: String,
    }

    pub type ClickHandler<N> = fn(&mut N, &ClickEvent) -> Result<()>;

    /// Named click handlers, as referenced from `data-on-click`.
    pub struct ClickModel<N> {
        handlers: IndexMap<String, ClickHandler<N>>,
    }

    impl<N: Navigator> Default for ClickModel<N> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<N: Navigator> ClickModel<N> {
        /// A model with `jumpTag` registered.
        pub fn new() -> Self {
            let mut model = Self {
                handlers: IndexMap::new(),
            };
            model.register(JUMP_TAG, jump_tag::<N>);
            model
        }

        pub fn register(&mut self, action: &str, handler: ClickHandler<N>) {
            self.handlers.insert(action.to_string(), handler);
        }

        pub fn dispatch(&self, navigator: &mut N, event: &ClickEvent) -> Result<()> {
            let Some(handler) = self.handlers.get(&event.action) else {
                bail!("no click handler registered for {:?}", event.action);
            };
            handler(navigator, event)
        }
    }

    fn jump_tag<N: Navigator>(navigator: &mut N, event: &ClickEvent) -> Result<()> {
        navigator.push_page(&event.data_ref)
    }

    /// Keeps the latest request per key.
    #[derive(Debug, Clone, Default)]
    pub struct MemorySink {
        slots: IndexMap<String, RenderRequest>,
    }

    impl MemorySink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn get(&self, key: &str) -> Option<&RenderRequest> {
            self.slots.get(key)
        }

        pub fn len(&self) -> usize {
            self.slots.len()
        }

        pub fn is_empty(&self) -> bool {
            self.slots.is_empty()
        }

        pub fn iter(&self) -> impl Iterator<Item = &RenderRequest> {
            self.slots.values()
        }
    }

    impl UiSink for MemorySink {
        fn provide_ui(&mut self, request: RenderRequest) {
            match self.slots.get_mut(&request.key) {
                Some(existing) if !request.reset => existing.template.push_str(&request.template),
                _ => {
                    self.slots.insert(request.key.clone(), request);
                }
            }
        }
    }

}

pub use graph::MemoryGraph;
pub use parser::{elapsed_minutes, parse_page_from_str, tag_code};
pub use settings::SummarySettings;
pub use summary::{summarize_block, summarize_page};
