/// Integration tests for the Ollama embedding client.
///
/// These tests need a running Ollama instance with an embedding model pulled, so they
/// are ignored by default and skipped in GitHub Actions.
///
/// To run locally:
/// ```bash
/// OLLAMA_EMBED_MODEL=nomic-embed-text cargo test --test ollama_integration -- --ignored
/// ```
use craml::extrapolate::cosine_similarity;
use craml::ollama::{Embedder, OllamaClientBuilder, OllamaError, RetryPolicy};

fn skip_in_ci() -> bool {
    if std::env::var("GITHUB_ACTIONS").as_deref() == Ok("true") {
        println!("Skipping test in GitHub Actions (no Ollama available)");
        return true;
    }
    false
}

#[test]
#[ignore = "needs a live Ollama instance"]
fn embeds_a_batch_with_a_real_instance() {
    if skip_in_ci() {
        return;
    }

    let client = OllamaClientBuilder::new()
        .batch_size(2)
        .build()
        .expect("Failed to create Ollama client");

    let texts = vec![
        "the invoice was inflated".to_string(),
        "an inflated invoice".to_string(),
        "the weather is mild".to_string(),
    ];
    let vectors = client.embed(&texts).expect("embedding request failed");

    assert_eq!(vectors.len(), 3);
    assert!(vectors.iter().all(|v| v.len() == vectors[0].len() && !v.is_empty()));
    assert!(
        cosine_similarity(&vectors[0], &vectors[1]) > cosine_similarity(&vectors[0], &vectors[2])
    );
}

#[test]
fn unreachable_host_reports_a_network_error() {
    let client = OllamaClientBuilder::new()
        .base_url("http://127.0.0.1:9")
        .retry(RetryPolicy::none())
        .build()
        .expect("Failed to create Ollama client");

    let err = client.embed(&["anything".to_string()]).unwrap_err();
    assert!(
        matches!(
            err,
            OllamaError::Network(_) | OllamaError::Timeout(_) | OllamaError::Http { .. }
        ),
        "unexpected error: {err:?}"
    );
}

#[test]
fn malformed_host_is_rejected_at_build_time() {
    let err = OllamaClientBuilder::new().base_url("not a url").build().err();
    assert!(matches!(err, Some(OllamaError::InvalidUrl(_))));
}
