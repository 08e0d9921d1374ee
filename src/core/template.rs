//! Token substitution for embedded templates.
//!
//! Templates reference values as `${name}`. Unknown tokens are left in place
//! so that a missing binding is visible in the output rather than silently
//! erased. `$${` escapes a literal `${`.

use std::collections::BTreeMap;

/// Token bindings for [`render`].
pub type Bindings = BTreeMap<&'static str, String>;

/// Substitute `${name}` tokens in `template` with values from `bindings`.
pub fn render(template: &str, bindings: &Bindings) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        if tail.starts_with("$${") {
            out.push_str("${");
            rest = &tail[3..];
            continue;
        }

        if let Some(body) = tail.strip_prefix("${") {
            if let Some(end) = body.find('}') {
                let name = &body[..end];
                match bindings.get(name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&tail[..end + 3]),
                }
                rest = &body[end + 1..];
                continue;
            }
        }

        out.push('$');
        rest = &tail[1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> Bindings {
        let mut b = Bindings::new();
        b.insert("realm", "EXAMPLE.COM".to_string());
        b.insert("port", "8888".to_string());
        b
    }

    #[test]
    fn replaces_known_tokens() {
        assert_eq!(
            render("kdc = ${realm}:${port}", &bindings()),
            "kdc = EXAMPLE.COM:8888"
        );
    }

    #[test]
    fn keeps_unknown_tokens() {
        assert_eq!(render("a ${missing} b", &bindings()), "a ${missing} b");
    }

    #[test]
    fn escapes_and_stray_dollars() {
        assert_eq!(render("$${realm} costs $5", &bindings()), "${realm} costs $5");
        assert_eq!(render("unterminated ${realm", &bindings()), "unterminated ${realm");
    }

    #[test]
    fn repeated_tokens() {
        assert_eq!(
            render("${port}${port}", &bindings()),
            "88888888"
        );
    }
}
