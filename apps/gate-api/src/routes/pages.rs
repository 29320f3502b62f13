//! Small HTML result pages for the browser half of the login.

use axum::response::Html;

pub fn success(token: &str, full_name: &str) -> Html<String> {
    page(
        "Signed in",
        &format!(
            "<h1>Welcome, {}!</h1>\
             <p>Copy this code into the app to finish signing in:</p>\
             <pre id=\"session-token\">{}</pre>",
            escape(full_name),
            escape(token)
        ),
    )
}

/// Shown when the token was delivered straight to the waiting app.
pub fn linked(full_name: &str) -> Html<String> {
    page(
        "Signed in",
        &format!(
            "<h1>Welcome, {}!</h1><p>You are signed in. You can close this window and return to the app.</p>",
            escape(full_name)
        ),
    )
}

pub fn error(message: &str) -> Html<String> {
    page(
        "Sign-in failed",
        &format!("<h1>Sign-in failed</h1><p>{}</p>", escape(message)),
    )
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{}</title></head><body>{}</body></html>",
        escape(title),
        body
    ))
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_user_supplied_text() {
        let Html(body) = success("tok", "<script>alert('x')</script>");
        assert!(!body.contains("<script>"));
        assert!(body.contains("&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"));
    }

    #[test]
    fn success_page_shows_token() {
        let Html(body) = success("abc.def.ghi", "Ada");
        assert!(body.contains("abc.def.ghi"));
    }
}
