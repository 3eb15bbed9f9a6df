use tera::Tera;

use crate::config::LISTING_TEMPLATE_NAME;

/// Directory listing page. Autoescaped (the name ends in `.html`); hrefs are
/// already percent-encoded.
const LISTING_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Index of {{ path }}</title>
</head>
<body>
<h1>Index of {{ path }}</h1>
<pre>
{% if has_parent %}<a href="../">../</a>
{% endif %}{% for entry in entries %}<a href="{{ entry.href | safe }}">{{ entry.name }}{% if entry.is_dir %}/{% endif %}</a>
{% endfor %}</pre>
</body>
</html>
"#;

/// Initialize the Tera template engine
pub fn init_templates() -> Result<Tera, tera::Error> {
    let mut tera = Tera::default();
    tera.add_raw_template(LISTING_TEMPLATE_NAME, LISTING_TEMPLATE)?;
    Ok(tera)
}
