use std::fs;
use std::io;
use std::path::Path;

struct Entry {
    name: String,
    display: String,
    link: String,
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn read_entries(dir: &Path) -> io::Result<Vec<Entry>> {
    let mut entries = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let encoded = urlencoding::encode(&name).into_owned();

        let is_symlink = entry
            .file_type()
            .map(|t| t.is_symlink())
            .unwrap_or(false);
        let is_dir = fs::metadata(entry.path())
            .map(|m| m.is_dir())
            .unwrap_or(false);

        let mut display = name.clone();
        let mut link = encoded;
        if is_dir {
            display.push('/');
            link.push('/');
        }
        // A link to a directory keeps the trailing slash in its href.
        if is_symlink {
            display = format!("{}@", name);
        }

        entries.push(Entry { name, display, link });
    }

    entries.sort_by_key(|e| e.name.to_lowercase());
    Ok(entries)
}

/// Renders the index page for `dir`. `request_path` is the decoded URL path
/// shown in the title.
pub fn render(dir: &Path, request_path: &str) -> io::Result<String> {
    let entries = read_entries(dir)?;
    let title = format!("Directory listing for {}", escape_html(request_path));

    let mut html = format!(
        "<!DOCTYPE HTML>
<html lang=\"en\">
<head>
    <meta charset=\"utf-8\">
    <title>{title}</title>
</head>
<body>
    <h1>{title}</h1>
    <hr>
    <ul>
"
    );

    for entry in &entries {
        html.push_str(&format!(
            "        <li><a href=\"{}\">{}</a></li>\n",
            entry.link,
            escape_html(&entry.display)
        ));
    }

    html.push_str("    </ul>\n    <hr>\n</body>\n</html>\n");
    Ok(html)
}
