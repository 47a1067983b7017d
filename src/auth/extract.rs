//! Token extraction from HTML and inline JavaScript
//!
//! Each token the handshake scrapes from a page has exactly one function
//! here, so a change in the remote markup is fixed in one place and each
//! extraction can be tested against a fixed fixture.

use regex::Regex;

/// Auto-submitting SAML form returned by the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamlForm {
    /// Base64 assertion, already HTML-unescaped
    pub saml_response: String,
    /// Opaque relay token, already HTML-unescaped; empty when the form has none
    pub relay_state: String,
    /// Form `action`, when present
    pub action: Option<String>,
}

/// Find the identity-provider app URL embedded in a service-provider page
///
/// Looks for `<idp_base>/app/...` in plain form first, then percent-encoded.
pub fn saml_redirect_url(html: &str, idp_base: &str) -> Option<String> {
    let idp_base = idp_base.trim_end_matches('/');

    let plain = Regex::new(&format!(
        r#"({}/app/(?:&amp;|[^"'<>\s;])+)"#,
        regex::escape(idp_base)
    ))
    .ok()?;
    if let Some(m) = plain.captures(html).and_then(|c| c.get(1)) {
        return Some(m.as_str().replace("&amp;", "&"));
    }

    let encoded_base = urlencoding::encode(idp_base).into_owned();
    let encoded = Regex::new(&format!(
        r#"(?i)({}%2Fapp%2F[^"'<>\s;&]+)"#,
        regex::escape(&encoded_base)
    ))
    .ok()?;
    let m = encoded.captures(html).and_then(|c| c.get(1))?;
    urlencoding::decode(m.as_str()).ok().map(|s| s.into_owned())
}

/// Find the Okta bootstrap `stateToken` in the sign-in page
///
/// The page embeds it in a JavaScript literal with `\x2D`-style escapes.
pub fn state_token(html: &str) -> Option<String> {
    let literal = Regex::new(r#""stateToken"\s*:\s*"([^"]+)""#).ok()?;
    if let Some(m) = literal.captures(html).and_then(|c| c.get(1)) {
        return Some(unescape_js(m.as_str()));
    }

    let query = Regex::new(r#"stateToken=([^&"']+)"#).ok()?;
    let m = query.captures(html).and_then(|c| c.get(1))?;
    Some(unescape_js(m.as_str()))
}

/// Extract the SAML assertion, relay state and action from the POST form
pub fn saml_form(html: &str) -> Option<SamlForm> {
    let saml_response = input_value(html, "SAMLResponse")?;
    let relay_state = input_value(html, "RelayState").unwrap_or_default();
    let action = Regex::new(r#"<form[^>]+action="([^"]+)""#)
        .ok()?
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| unescape_html(m.as_str()));

    Some(SamlForm {
        saml_response,
        relay_state,
        action,
    })
}

/// Value of a named `<input>`, accepting either attribute order
fn input_value(html: &str, name: &str) -> Option<String> {
    let name = regex::escape(name);
    let patterns = [
        format!(r#"name="{}"[^>]*value="([^"]+)""#, name),
        format!(r#"value="([^"]+)"[^>]*name="{}""#, name),
    ];
    patterns.iter().find_map(|pattern| {
        let re = Regex::new(pattern).ok()?;
        let m = re.captures(html)?.get(1)?;
        Some(unescape_html(m.as_str()))
    })
}

/// Decode JavaScript string escapes (`\xHH`, `\uHHHH`, `\/`, `\\`, ...)
///
/// Unknown or truncated escapes are kept literally.
pub fn unescape_js(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('x') => push_hex_escape(&mut out, &mut chars, 'x', 2),
            Some('u') => push_hex_escape(&mut out, &mut chars, 'u', 4),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other @ ('\\' | '/' | '"' | '\'')) => out.push(other),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn push_hex_escape(
    out: &mut String,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    marker: char,
    width: usize,
) {
    let mut digits = String::with_capacity(width);
    while digits.len() < width {
        match chars.peek() {
            Some(d) if d.is_ascii_hexdigit() => {
                digits.push(*d);
                chars.next();
            }
            _ => break,
        }
    }

    let decoded = if digits.len() == width {
        u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32)
    } else {
        None
    };

    match decoded {
        Some(ch) => out.push(ch),
        None => {
            out.push('\\');
            out.push(marker);
            out.push_str(&digits);
        }
    }
}

/// Decode HTML character references (`&amp;`, `&#43;`, `&#x2B;`, ...)
///
/// Unknown entities are kept literally.
pub fn unescape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        // Entities are short; a distant ';' belongs to something else
        let decoded = tail
            .char_indices()
            .take(12)
            .find(|(_, c)| *c == ';')
            .and_then(|(end, _)| decode_entity(&tail[1..end]).map(|ch| (ch, end)));

        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let numeric = entity.strip_prefix('#')?;
            let code = match numeric.strip_prefix(|c: char| c == 'x' || c == 'X') {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}
