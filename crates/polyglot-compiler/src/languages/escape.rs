/// Make `code` safe to embed in a template literal inside a `<script>`.
///
/// With `slash` set, backslashes are doubled so the literal evaluates back
/// to the original text; without it they pass through untouched.
pub fn escape_code(code: &str, slash: bool) -> String {
    let escaped = if slash {
        code.replace('\\', "\\\\")
    } else {
        code.to_owned()
    };
    escaped.replace('`', "\\`").replace("</script>", "<\\/script>")
}
