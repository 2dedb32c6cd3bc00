//! UI tree interpreter
//!
//! Maps the declarative `{type, props, children}` tree returned by `view`
//! into a [`Widget`] tree. Building never fails: malformed or unknown nodes
//! become [`Widget::Diagnostic`] entries in place. The only side channel is
//! the [`EventSink`], which receives an [`InboundMessage`] for every
//! interaction with a widget that declares a handler.

use applet_types::{scalar_text, InboundMessage, UiNode};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// Source prefix of images bundled with the script
pub const LOCAL_IMAGE_PREFIX: &str = "local://";

/// Maps with at least this many keys, all scalar, display as a table.
pub const TABLE_MIN_KEYS: usize = 5;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InteractionError {
    #[error("no widget at path {0}")]
    NoWidget(String),

    #[error("{kind} widget is not interactive")]
    NotInteractive { kind: &'static str },

    #[error("{kind} widget is disabled")]
    Disabled { kind: &'static str },

    #[error("option {index} out of range ({len} options)")]
    OutOfRange { index: usize, len: usize },
}

/// Outbound side of the interaction channel
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<InboundMessage>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<InboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, msg: InboundMessage) {
        tracing::debug!(msg_type = ?msg.msg_type(), "UI event");
        if self.tx.send(msg).is_err() {
            tracing::debug!("UI event dropped, host is gone");
        }
    }
}

/// Handler payload declared on a node
#[derive(Debug, Clone, PartialEq)]
pub struct Handler(Map<String, Value>);

impl Handler {
    /// A mis-shaped handler comes back as the diagnostic to render instead.
    fn from_node(node: &UiNode<'_>, name: &str) -> Result<Option<Self>, Widget> {
        match node.handler(name) {
            Ok(payload) => Ok(payload.map(|payload| Handler(payload.clone()))),
            Err(_) => Err(wrong_shape(node, name, "a table")),
        }
    }

    /// The payload verbatim, plus `value` when the event captured one.
    pub fn message(&self, value: Option<Value>) -> InboundMessage {
        let msg = InboundMessage::from_payload(&self.0);
        match value {
            Some(value) => msg.with("value", value),
            None => msg,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectOption {
    pub value: Value,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    Pending,
    Loaded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    /// Bundled asset, shown as a placeholder
    Local(String),
    Remote { url: String, state: LoadState },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    pub title: String,
    pub subtitle: Option<String>,
    pub copy: Option<String>,
}

impl ListItem {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(record) => {
                let text = |key: &str| record.get(key).and_then(scalar_text);
                Self {
                    title: text("title").unwrap_or_default(),
                    subtitle: text("subtitle"),
                    copy: text("copy"),
                }
            }
            other => Self {
                title: scalar_text(other).unwrap_or_else(|| other.to_string()),
                subtitle: None,
                copy: None,
            },
        }
    }

    fn matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self
                .subtitle
                .as_ref()
                .is_some_and(|s| s.to_lowercase().contains(needle))
    }
}

/// Recursive presentation of `result_display` data
#[derive(Debug, Clone, PartialEq)]
pub enum DataView {
    Null,
    Scalar(String),
    Sequence(Vec<DataView>),
    Map(Vec<(String, DataView)>),
    /// Key/value rows of a table-like map
    Table(Vec<(String, String)>),
}

impl DataView {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => DataView::Null,
            Value::Array(items) => DataView::Sequence(items.iter().map(Self::from_value).collect()),
            Value::Object(map) if is_table_like(map) => DataView::Table(
                map.iter()
                    .map(|(k, v)| (k.clone(), scalar_text(v).unwrap_or_else(|| "null".to_string())))
                    .collect(),
            ),
            Value::Object(map) => DataView::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_value(v)))
                    .collect(),
            ),
            scalar => DataView::Scalar(scalar_text(scalar).unwrap_or_default()),
        }
    }
}

fn is_table_like(map: &Map<String, Value>) -> bool {
    map.len() >= TABLE_MIN_KEYS && map.values().all(|v| !v.is_array() && !v.is_object())
}

#[derive(Debug, Clone, PartialEq)]
pub enum Widget {
    Column {
        children: Vec<Widget>,
    },
    Row {
        children: Vec<Widget>,
    },
    Section {
        title: Option<String>,
        children: Vec<Widget>,
    },
    Text {
        text: String,
        /// Text placed on the clipboard by the copy affordance
        copy: Option<String>,
    },
    Button {
        label: String,
        on_press: Option<Handler>,
        disabled: bool,
    },
    TextField {
        /// Last value committed by the script
        value: String,
        /// Local edit buffer
        draft: String,
        placeholder: Option<String>,
        on_change: Option<Handler>,
        on_submit: Option<Handler>,
    },
    Toggle {
        label: Option<String>,
        value: bool,
        on_change: Option<Handler>,
    },
    Select {
        value: Option<Value>,
        options: Vec<SelectOption>,
        on_change: Option<Handler>,
    },
    Image {
        source: ImageSource,
        alt: Option<String>,
    },
    List {
        items: Vec<ListItem>,
        enhanced: bool,
        query: String,
    },
    ResultDisplay {
        title: Option<String>,
        error: Option<String>,
        data: DataView,
    },
    Diagnostic {
        message: String,
    },
}

impl Widget {
    /// Build a widget tree. Never fails.
    pub fn from_value(value: &Value) -> Self {
        match UiNode::parse(value) {
            Ok(node) => Self::from_node(&node),
            Err(err) => Self::diagnostic(err.to_string()),
        }
    }

    fn from_node(node: &UiNode<'_>) -> Self {
        let children = || -> Vec<Widget> { node.children.iter().map(Self::from_value).collect() };

        match node.kind {
            "column" => Widget::Column {
                children: children(),
            },
            "row" => Widget::Row {
                children: children(),
            },
            "section" => Widget::Section {
                title: node.text_prop("title"),
                children: children(),
            },
            "text" => text_widget(node),
            "button" => match (node.text_prop("label"), Handler::from_node(node, "on_press")) {
                (None, _) => missing(node, "label"),
                (_, Err(diagnostic)) => diagnostic,
                (Some(label), Ok(on_press)) => Widget::Button {
                    disabled: on_press.is_none() || node.bool_prop("disabled"),
                    label,
                    on_press,
                },
            },
            "text_field" => match node.prop("value") {
                Some(v) if scalar_text(v).is_none() => wrong_shape(node, "value", "a scalar"),
                value => match (
                    Handler::from_node(node, "on_change"),
                    Handler::from_node(node, "on_submit"),
                ) {
                    (Err(diagnostic), _) | (_, Err(diagnostic)) => diagnostic,
                    (Ok(on_change), Ok(on_submit)) => {
                        let value = value.and_then(scalar_text).unwrap_or_default();
                        Widget::TextField {
                            draft: value.clone(),
                            value,
                            placeholder: node.text_prop("placeholder"),
                            on_change,
                            on_submit,
                        }
                    }
                },
            },
            "toggle" => match node.prop("value") {
                Some(Value::Bool(value)) => match Handler::from_node(node, "on_change") {
                    Ok(on_change) => Widget::Toggle {
                        label: node.text_prop("label"),
                        value: *value,
                        on_change,
                    },
                    Err(diagnostic) => diagnostic,
                },
                Some(_) => wrong_shape(node, "value", "a boolean"),
                None => missing(node, "value"),
            },
            "select" => select_widget(node),
            "image" => match node.str_prop("src") {
                Some(src) => Widget::Image {
                    source: match src.strip_prefix(LOCAL_IMAGE_PREFIX) {
                        Some(path) => ImageSource::Local(path.to_string()),
                        None => ImageSource::Remote {
                            url: src.to_string(),
                            state: LoadState::Pending,
                        },
                    },
                    alt: node.text_prop("alt"),
                },
                None => missing(node, "src"),
            },
            "list" => match node.prop("items") {
                Some(Value::Array(items)) => Widget::List {
                    items: items.iter().map(ListItem::from_value).collect(),
                    enhanced: node.bool_prop("enhanced"),
                    query: String::new(),
                },
                Some(Value::Object(m)) if m.is_empty() => Widget::List {
                    items: Vec::new(),
                    enhanced: node.bool_prop("enhanced"),
                    query: String::new(),
                },
                Some(_) => wrong_shape(node, "items", "a sequence"),
                None => missing(node, "items"),
            },
            "result_display" => Widget::ResultDisplay {
                title: node.text_prop("title"),
                error: node.text_prop("error"),
                data: node
                    .prop("data")
                    .map(DataView::from_value)
                    .unwrap_or(DataView::Null),
            },
            other => Self::diagnostic(format!("unknown node type: {}", other)),
        }
    }

    fn diagnostic(message: String) -> Self {
        tracing::debug!("UI diagnostic: {}", message);
        Widget::Diagnostic { message }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Widget::Column { .. } => "column",
            Widget::Row { .. } => "row",
            Widget::Section { .. } => "section",
            Widget::Text { .. } => "text",
            Widget::Button { .. } => "button",
            Widget::TextField { .. } => "text_field",
            Widget::Toggle { .. } => "toggle",
            Widget::Select { .. } => "select",
            Widget::Image { .. } => "image",
            Widget::List { .. } => "list",
            Widget::ResultDisplay { .. } => "result_display",
            Widget::Diagnostic { .. } => "diagnostic",
        }
    }

    pub fn children(&self) -> &[Widget] {
        match self {
            Widget::Column { children }
            | Widget::Row { children }
            | Widget::Section { children, .. } => children,
            _ => &[],
        }
    }

    fn children_mut(&mut self) -> Option<&mut Vec<Widget>> {
        match self {
            Widget::Column { children }
            | Widget::Row { children }
            | Widget::Section { children, .. } => Some(children),
            _ => None,
        }
    }

    /// Whether the widget accepts user input right now
    pub fn is_interactive(&self) -> bool {
        match self {
            Widget::Button { disabled, .. } => !disabled,
            Widget::TextField { .. } => true,
            Widget::Toggle { on_change, .. } | Widget::Select { on_change, .. } => {
                on_change.is_some()
            }
            Widget::List { enhanced, .. } => *enhanced,
            _ => false,
        }
    }

    /// Items of a list that match its current search query
    pub fn visible_items(&self) -> Vec<&ListItem> {
        match self {
            Widget::List {
                items,
                enhanced: true,
                query,
            } if !query.trim().is_empty() => {
                let needle = query.trim().to_lowercase();
                items.iter().filter(|item| item.matches(&needle)).collect()
            }
            Widget::List { items, .. } => items.iter().collect(),
            _ => Vec::new(),
        }
    }
}

fn text_widget(node: &UiNode<'_>) -> Widget {
    let Some(text) = node.text_prop("text") else {
        return missing(node, "text");
    };

    let copy = match (node.prop("copy_value"), node.prop("copy")) {
        (Some(value), _) => scalar_text(value),
        (None, Some(Value::String(copy))) => Some(copy.clone()),
        (None, Some(Value::Bool(true))) => Some(text.clone()),
        _ => None,
    };

    Widget::Text { text, copy }
}

fn select_widget(node: &UiNode<'_>) -> Widget {
    let on_change = match Handler::from_node(node, "on_change") {
        Ok(on_change) => on_change,
        Err(diagnostic) => return diagnostic,
    };
    let raw: &[Value] = match node.prop("options") {
        Some(Value::Array(options)) => options.as_slice(),
        Some(Value::Object(m)) if m.is_empty() => &[],
        Some(_) => return wrong_shape(node, "options", "a sequence"),
        None => return missing(node, "options"),
    };

    let mut options = Vec::with_capacity(raw.len());
    for (i, option) in raw.iter().enumerate() {
        let parsed = match option {
            Value::Object(record) => match record.get("value").filter(|v| !v.is_null()) {
                Some(value) => SelectOption {
                    label: record
                        .get("label")
                        .and_then(scalar_text)
                        .or_else(|| scalar_text(value))
                        .unwrap_or_else(|| value.to_string()),
                    value: value.clone(),
                },
                None => {
                    return Widget::diagnostic(format!(
                        "select: option {} has no `value`",
                        i
                    ))
                }
            },
            bare => SelectOption {
                label: scalar_text(bare).unwrap_or_else(|| bare.to_string()),
                value: bare.clone(),
            },
        };
        options.push(parsed);
    }

    Widget::Select {
        value: node.prop("value").cloned(),
        options,
        on_change,
    }
}

fn missing(node: &UiNode<'_>, prop: &str) -> Widget {
    Widget::diagnostic(format!("{}: missing required prop `{}`", node.kind, prop))
}

fn wrong_shape(node: &UiNode<'_>, prop: &str, expected: &str) -> Widget {
    Widget::diagnostic(format!("{}: prop `{}` must be {}", node.kind, prop, expected))
}

/// Dotted child-index form of a widget path, `"root"` for the empty path
pub fn format_path(path: &[usize]) -> String {
    if path.is_empty() {
        return "root".to_string();
    }
    path.iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// A rendered widget tree wired to an event sink
#[derive(Debug)]
pub struct Rendered {
    root: Widget,
    sink: EventSink,
}

impl Rendered {
    pub fn root(&self) -> &Widget {
        &self.root
    }

    pub fn get(&self, path: &[usize]) -> Option<&Widget> {
        path.iter()
            .try_fold(&self.root, |widget, &i| widget.children().get(i))
    }

    pub fn get_mut(&mut self, path: &[usize]) -> Option<&mut Widget> {
        let mut widget = &mut self.root;
        for &i in path {
            widget = widget.children_mut()?.get_mut(i)?;
        }
        Some(widget)
    }

    fn widget_mut(&mut self, path: &[usize]) -> Result<&mut Widget, InteractionError> {
        self.get_mut(path)
            .ok_or_else(|| InteractionError::NoWidget(format_path(path)))
    }

    /// Paths of every widget that currently accepts input, depth-first
    pub fn interactive(&self) -> Vec<(Vec<usize>, &Widget)> {
        fn walk<'w>(widget: &'w Widget, path: &mut Vec<usize>, out: &mut Vec<(Vec<usize>, &'w Widget)>) {
            if widget.is_interactive() {
                out.push((path.clone(), widget));
            }
            for (i, child) in widget.children().iter().enumerate() {
                path.push(i);
                walk(child, path, out);
                path.pop();
            }
        }

        let mut out = Vec::new();
        walk(&self.root, &mut Vec::new(), &mut out);
        out
    }

    pub fn press(&mut self, path: &[usize]) -> Result<(), InteractionError> {
        let msg = match self.widget_mut(path)? {
            Widget::Button {
                on_press: Some(handler),
                disabled: false,
                ..
            } => handler.message(None),
            Widget::Button { .. } => return Err(InteractionError::Disabled { kind: "button" }),
            other => return Err(InteractionError::NotInteractive { kind: other.kind() }),
        };
        self.sink.emit(msg);
        Ok(())
    }

    /// Replace a text field's local draft, firing `on_change` when declared.
    pub fn edit(&mut self, path: &[usize], text: &str) -> Result<(), InteractionError> {
        let msg = match self.widget_mut(path)? {
            Widget::TextField {
                draft, on_change, ..
            } => {
                *draft = text.to_string();
                on_change
                    .as_ref()
                    .map(|h| h.message(Some(Value::String(text.to_string()))))
            }
            other => return Err(InteractionError::NotInteractive { kind: other.kind() }),
        };
        if let Some(msg) = msg {
            self.sink.emit(msg);
        }
        Ok(())
    }

    /// Commit a text field's draft, firing `on_submit` when declared.
    pub fn submit(&mut self, path: &[usize]) -> Result<(), InteractionError> {
        let msg = match self.widget_mut(path)? {
            Widget::TextField {
                value,
                draft,
                on_submit,
                ..
            } => {
                *value = draft.clone();
                on_submit
                    .as_ref()
                    .map(|h| h.message(Some(Value::String(draft.clone()))))
            }
            other => return Err(InteractionError::NotInteractive { kind: other.kind() }),
        };
        if let Some(msg) = msg {
            self.sink.emit(msg);
        }
        Ok(())
    }

    pub fn toggle(&mut self, path: &[usize]) -> Result<(), InteractionError> {
        let msg = match self.widget_mut(path)? {
            Widget::Toggle {
                value,
                on_change: Some(handler),
                ..
            } => {
                *value = !*value;
                handler.message(Some(Value::Bool(*value)))
            }
            Widget::Toggle { .. } => return Err(InteractionError::Disabled { kind: "toggle" }),
            other => return Err(InteractionError::NotInteractive { kind: other.kind() }),
        };
        self.sink.emit(msg);
        Ok(())
    }

    /// Select the option at `index`.
    pub fn choose(&mut self, path: &[usize], index: usize) -> Result<(), InteractionError> {
        let msg = match self.widget_mut(path)? {
            Widget::Select {
                value,
                options,
                on_change: Some(handler),
            } => {
                let option = options.get(index).ok_or(InteractionError::OutOfRange {
                    index,
                    len: options.len(),
                })?;
                *value = Some(option.value.clone());
                handler.message(Some(option.value.clone()))
            }
            Widget::Select { .. } => return Err(InteractionError::Disabled { kind: "select" }),
            other => return Err(InteractionError::NotInteractive { kind: other.kind() }),
        };
        self.sink.emit(msg);
        Ok(())
    }

    /// Set the search query of an enhanced list. Local only.
    pub fn search(&mut self, path: &[usize], text: &str) -> Result<(), InteractionError> {
        match self.widget_mut(path)? {
            Widget::List {
                enhanced: true,
                query,
                ..
            } => {
                *query = text.to_string();
                Ok(())
            }
            other => Err(InteractionError::NotInteractive { kind: other.kind() }),
        }
    }

    /// Text the copy affordance at `path` would place on the clipboard
    pub fn copy_text(&self, path: &[usize]) -> Result<String, InteractionError> {
        match self.get(path) {
            Some(Widget::Text { copy: Some(copy), .. }) => Ok(copy.clone()),
            Some(other) => Err(InteractionError::NotInteractive { kind: other.kind() }),
            None => Err(InteractionError::NoWidget(format_path(path))),
        }
    }

    pub fn set_load_state(&mut self, path: &[usize], new_state: LoadState) -> Result<(), InteractionError> {
        match self.widget_mut(path)? {
            Widget::Image {
                source: ImageSource::Remote { state, .. },
                ..
            } => {
                *state = new_state;
                Ok(())
            }
            other => Err(InteractionError::NotInteractive { kind: other.kind() }),
        }
    }
}

/// Renders UI trees against a fixed event sink
#[derive(Debug, Clone)]
pub struct UiInterpreter {
    sink: EventSink,
}

impl UiInterpreter {
    pub fn new(sink: EventSink) -> Self {
        Self { sink }
    }

    pub fn render(&self, tree: &Value) -> Rendered {
        Rendered {
            root: Widget::from_value(tree),
            sink: self.sink.clone(),
        }
    }
}
