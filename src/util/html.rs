use regex::Regex;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid conversion regex")
}

/// Convert the common subset of rich-text HTML the source system emits into
/// Markdown. Pure function; the migration engine treats it as a black box.
///
/// Intentionally lossy: complex tables and deeply nested lists degrade to
/// flat text rather than failing.
pub fn html_to_markdown(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let mut text = html.to_string();

    // Collapse whitespace first; the tag replacements below reintroduce
    // the newlines that matter.
    text = re(r"\s+").replace_all(&text, " ").into_owned();

    // Code blocks before inline handling, and before <p...> can eat <pre>.
    text = re(r"(?is)<pre[^>]*>\s*<code[^>]*>(.*?)</code>\s*</pre>")
        .replace_all(&text, "\n```\n${1}\n```\n\n")
        .into_owned();
    text = re(r"(?is)<pre[^>]*>(.*?)</pre>")
        .replace_all(&text, "\n```\n${1}\n```\n\n")
        .into_owned();
    text = re(r"(?is)<code[^>]*>(.*?)</code>")
        .replace_all(&text, "`${1}`")
        .into_owned();

    text = re(r"(?i)<p(?:\s[^>]*)?>").replace_all(&text, "").into_owned();
    text = re(r"(?i)</p>").replace_all(&text, "\n\n").into_owned();
    text = re(r"(?i)<br\s*/?>").replace_all(&text, "\n").into_owned();

    for level in (1..=6).rev() {
        let pattern = format!(r"(?is)<h{level}[^>]*>(.*?)</h{level}>");
        let replacement = format!("{} ${{1}}\n\n", "#".repeat(level));
        text = re(&pattern)
            .replace_all(&text, replacement.as_str())
            .into_owned();
    }

    text = re(r"(?i)</?[uo]l[^>]*>").replace_all(&text, "\n").into_owned();
    text = re(r"(?is)<li[^>]*>(.*?)</li>")
        .replace_all(&text, "\n* ${1}")
        .into_owned();
    text = re(r"(?is)<blockquote[^>]*>(.*?)</blockquote>")
        .replace_all(&text, "\n> ${1}\n")
        .into_owned();
    text = re(r"(?i)<hr[^>]*>").replace_all(&text, "\n---\n").into_owned();

    text = re(r"(?is)<strong[^>]*>(.*?)</strong>")
        .replace_all(&text, "**${1}**")
        .into_owned();
    text = re(r"(?is)<b>(.*?)</b>")
        .replace_all(&text, "**${1}**")
        .into_owned();
    text = re(r"(?is)<em[^>]*>(.*?)</em>")
        .replace_all(&text, "*${1}*")
        .into_owned();
    text = re(r"(?is)<i>(.*?)</i>")
        .replace_all(&text, "*${1}*")
        .into_owned();
    // Markdown has no underline; italics is the closest rendering.
    text = re(r"(?is)<u>(.*?)</u>")
        .replace_all(&text, "*${1}*")
        .into_owned();

    text = re(r#"(?is)<a\s+[^>]*?href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#)
        .replace_all(&text, "[${2}](${1})")
        .into_owned();

    // Tables degrade to pipe-separated rows.
    text = re(r"(?i)</?table[^>]*>").replace_all(&text, "\n").into_owned();
    text = re(r"(?i)<tr[^>]*>").replace_all(&text, "| ").into_owned();
    text = re(r"(?i)</tr>").replace_all(&text, " |\n").into_owned();
    text = re(r"(?is)<t[dh][^>]*>(.*?)</t[dh]>")
        .replace_all(&text, "${1} | ")
        .into_owned();

    // Anything left is a tag we don't render.
    text = re(r"<[^>]+>").replace_all(&text, "").into_owned();

    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    lines.join("\n")
}
