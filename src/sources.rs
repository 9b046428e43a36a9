use url::Url;

/// Label used when a source cannot be parsed as a URL with a host.
pub const FALLBACK_SOURCE_LABEL: &str = "External Source";

/// Known research domains, checked in order against the lowercased URL.
const KNOWN_SOURCES: &[(&str, &str)] = &[
    ("cnpj.biz", "CNPJ Biz"),
    ("econodata.com.br", "Econodata"),
    ("casadosdados.com.br", "Casa dos Dados"),
    ("solutudo.com.br", "Solutudo"),
    ("transparencia.cc", "Transparência CC"),
    ("speedio.com.br", "Speedio"),
    ("gov.br", "Receita/Portal Gov"),
    ("linkedin.com", "LinkedIn"),
    ("instagram.com", "Instagram"),
];

/// Short human label for a research source URL. Never fails.
pub fn friendly_source_name(url: &str) -> String {
    let lower = url.to_lowercase();
    if let Some((_, label)) = KNOWN_SOURCES
        .iter()
        .find(|(needle, _)| lower.contains(needle))
    {
        return label.to_string();
    }

    let host = Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string));
    match host {
        Some(host) if !host.is_empty() => capitalize(host.strip_prefix("www.").unwrap_or(&host)),
        _ => FALLBACK_SOURCE_LABEL.to_string(),
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
