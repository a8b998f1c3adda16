//! Vendor header styles (spec §4.5.1, §6): `antigravity` for the Claude
//! route, `gemini-cli` for the Gemini route. Values must be set verbatim
//! since compatibility with the proprietary backend is behavioral, not
//! cosmetic.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStyle {
    Antigravity,
    GeminiCli,
}

pub struct HeaderPlan {
    pub streaming: bool,
    pub claude_thinking: bool,
}

/// Builds the full header set for one outbound call. `access_token` is
/// the already-refreshed bearer token (§4.2 `getValidAccessToken`).
pub fn build_headers(style: HeaderStyle, access_token: &str, plan: HeaderPlan) -> Vec<(String, String)> {
    let mut headers = vec![
        ("Authorization".to_string(), format!("Bearer {access_token}")),
        ("Content-Type".to_string(), "application/json".to_string()),
    ];

    match style {
        HeaderStyle::Antigravity => {
            headers.push((
                "User-Agent".to_string(),
                "antigravity/0.1.0 (darwin; x64)".to_string(),
            ));
            headers.push((
                "X-Goog-Api-Client".to_string(),
                "google-cloud-sdk antigravity-gateway".to_string(),
            ));
            headers.push((
                "Client-Metadata".to_string(),
                r#"{"ideType":"IDE_UNSPECIFIED","platform":"PLATFORM_UNSPECIFIED","pluginType":"GEMINI"}"#
                    .to_string(),
            ));
        }
        HeaderStyle::GeminiCli => {
            headers.push((
                "User-Agent".to_string(),
                "google-api-nodejs-client/9.0.0".to_string(),
            ));
            headers.push((
                "X-Goog-Api-Client".to_string(),
                "gl-node/20 gccl/gemini-cli".to_string(),
            ));
            headers.push((
                "Client-Metadata".to_string(),
                "ideType=IDE_UNSPECIFIED,platform=PLATFORM_UNSPECIFIED".to_string(),
            ));
        }
    }

    if plan.streaming {
        headers.push(("Accept".to_string(), "text/event-stream".to_string()));
    }
    if plan.claude_thinking {
        headers.push((
            "anthropic-beta".to_string(),
            "interleaved-thinking-2025-05-14".to_string(),
        ));
    }

    headers
}
