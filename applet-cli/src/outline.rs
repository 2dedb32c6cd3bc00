//! Text outline of a widget tree.
//!
//! Every widget gets one line prefixed with its path, so the REPL can
//! address it (`press 1.0`).

use applet_runtime::{format_path, DataView, ImageSource, LoadState, Widget};
use std::fmt::Write;

pub fn outline(root: &Widget) -> String {
    let mut out = String::new();
    write_widget(&mut out, root, &mut Vec::new());
    out
}

fn write_widget(out: &mut String, widget: &Widget, path: &mut Vec<usize>) {
    let indent = "  ".repeat(path.len());
    let _ = writeln!(out, "{}[{}] {}", indent, format_path(path), describe(widget));

    match widget {
        Widget::List { .. } => {
            for item in widget.visible_items() {
                let _ = match &item.subtitle {
                    Some(subtitle) => writeln!(out, "{}  - {} ({})", indent, item.title, subtitle),
                    None => writeln!(out, "{}  - {}", indent, item.title),
                };
            }
        }
        Widget::ResultDisplay { error, data, .. } => {
            if let Some(error) = error {
                let _ = writeln!(out, "{}  error: {}", indent, error);
            }
            write_data(out, data, path.len() + 1);
        }
        _ => {}
    }

    for (i, child) in widget.children().iter().enumerate() {
        path.push(i);
        write_widget(out, child, path);
        path.pop();
    }
}

fn describe(widget: &Widget) -> String {
    match widget {
        Widget::Column { .. } | Widget::Row { .. } => widget.kind().to_string(),
        Widget::Section { title, .. } => match title {
            Some(title) => format!("section {:?}", title),
            None => "section".to_string(),
        },
        Widget::Text { text, copy } => match copy {
            Some(_) => format!("text {:?} [copy]", text),
            None => format!("text {:?}", text),
        },
        Widget::Button {
            label, disabled, ..
        } => {
            if *disabled {
                format!("button {:?} (disabled)", label)
            } else {
                format!("button {:?}", label)
            }
        }
        Widget::TextField {
            value,
            draft,
            placeholder,
            ..
        } => {
            let mut line = format!("text_field {:?}", value);
            if let Some(placeholder) = placeholder {
                let _ = write!(line, " placeholder {:?}", placeholder);
            }
            if draft != value {
                let _ = write!(line, " draft {:?}", draft);
            }
            line
        }
        Widget::Toggle { label, value, .. } => format!(
            "toggle {}{}",
            if *value { "on" } else { "off" },
            label
                .as_ref()
                .map(|l| format!(" {:?}", l))
                .unwrap_or_default()
        ),
        Widget::Select { value, options, .. } => {
            let labels: Vec<String> = options
                .iter()
                .enumerate()
                .map(|(i, option)| {
                    let marker = if value.as_ref() == Some(&option.value) { "*" } else { "" };
                    format!("{}:{}{}", i, option.label, marker)
                })
                .collect();
            format!("select [{}]", labels.join(", "))
        }
        Widget::Image { source, alt } => {
            let alt = alt.as_ref().map(|a| format!(" {:?}", a)).unwrap_or_default();
            match source {
                ImageSource::Local(path) => format!("image placeholder local://{}{}", path, alt),
                ImageSource::Remote { url, state } => {
                    let state = match state {
                        LoadState::Pending => "pending".to_string(),
                        LoadState::Loaded => "loaded".to_string(),
                        LoadState::Failed(reason) => format!("failed: {}", reason),
                    };
                    format!("image {} ({}){}", url, state, alt)
                }
            }
        }
        Widget::List {
            items,
            enhanced,
            query,
        } => {
            if *enhanced && !query.is_empty() {
                format!("list {} items, searchable, query {:?}", items.len(), query)
            } else if *enhanced {
                format!("list {} items, searchable", items.len())
            } else {
                format!("list {} items", items.len())
            }
        }
        Widget::ResultDisplay { title, .. } => match title {
            Some(title) => format!("result {:?}", title),
            None => "result".to_string(),
        },
        Widget::Diagnostic { message } => format!("! {}", message),
    }
}

fn write_data(out: &mut String, data: &DataView, depth: usize) {
    let indent = "  ".repeat(depth);
    match data {
        DataView::Null => {
            let _ = writeln!(out, "{}null", indent);
        }
        DataView::Scalar(text) => {
            let _ = writeln!(out, "{}{}", indent, text);
        }
        DataView::Sequence(items) => {
            for item in items {
                let _ = writeln!(out, "{}-", indent);
                write_data(out, item, depth + 1);
            }
        }
        DataView::Map(entries) => {
            for (key, value) in entries {
                let _ = writeln!(out, "{}{}:", indent, key);
                write_data(out, value, depth + 1);
            }
        }
        DataView::Table(rows) => {
            let width = rows.iter().map(|(k, _)| k.chars().count()).max().unwrap_or(0);
            for (key, value) in rows {
                let _ = writeln!(out, "{}{:<width$} | {}", indent, key, value, width = width);
            }
        }
    }
}
