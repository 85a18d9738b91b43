use crate::models::{Binder, CardEntry};

#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub file_name: String,
    pub contents: String,
}

/// Renders a binder as `<count>x <name>` lines, sorted by card name.
pub fn render<'a>(binder: &Binder, entries: impl IntoIterator<Item = &'a CardEntry>) -> ExportFile {
    let mut lines = entries
        .into_iter()
        .filter(|e| e.count > 0)
        .map(|e| (e.name.as_str(), e.count))
        .collect::<Vec<_>>();
    lines.sort();

    ExportFile {
        file_name: file_name(binder),
        contents: lines
            .iter()
            .map(|(name, count)| format!("{}x {}", count, name))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn file_name(binder: &Binder) -> String {
    let name = binder
        .name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect::<String>();
    format!("{}_{}.txt", name.trim(), binder.kind.export_suffix())
}
