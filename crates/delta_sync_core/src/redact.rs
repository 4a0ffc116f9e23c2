/// Keeps the last `visible` characters of a secret.
pub fn mask_secret(secret: &str, visible: usize) -> String {
    let total = secret.chars().count();
    let hidden = total.saturating_sub(visible);
    secret
        .chars()
        .enumerate()
        .map(|(index, ch)| if index < hidden { '*' } else { ch })
        .collect()
}

/// Blanks every value in a `key=value` parameter list.
pub fn mask_params(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(key, _)| format!("{key}=****"))
        .collect::<Vec<_>>()
        .join("&")
}
