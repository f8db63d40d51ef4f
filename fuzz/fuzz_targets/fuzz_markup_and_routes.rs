#![no_main]

use std::sync::{Arc, LazyLock};

use libfuzzer_sys::fuzz_target;

use embed_redirects::html::{AttributeValue, TagProcessor};
use embed_redirects::{EmbedRedirects, MemoryOptionStore, RedirectConfig, RenderContext};

static REDIRECTS: LazyLock<EmbedRedirects> = LazyLock::new(|| {
    let store = Arc::new(MemoryOptionStore::new());
    store.set("embed_redirects_salt", "fuzz-salt");
    let config = RedirectConfig {
        site_url: "https://site.test/".to_string(),
        ..RedirectConfig::default()
    };
    EmbedRedirects::new(config, store).expect("fuzz config is valid")
});

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    // Tag walking and serialization must never panic, and an untouched
    // document must serialize back byte-for-byte.
    let mut processor = TagProcessor::new(input);
    let mut anchors = 0;
    while processor.next_tag("a") {
        anchors += 1;
        if let Some(AttributeValue::Text(href)) = processor.get_attribute("href") {
            processor.set_attribute("href", &href);
        }
    }
    let _ = processor.get_updated_html();
    assert_eq!(TagProcessor::new(input).get_updated_html(), input);

    // Rewriting is idempotent.
    if anchors > 0 {
        let once = REDIRECTS
            .rewrite_content(input, &RenderContext::embed())
            .expect("memory store never fails")
            .into_owned();
        let twice = REDIRECTS
            .rewrite_content(&once, &RenderContext::embed())
            .expect("memory store never fails");
        assert_eq!(twice, once);
    }

    // Route resolution and both validation stages accept any target.
    let mut ctx = REDIRECTS.request_context(input);
    let validator = REDIRECTS.validator();
    if validator.parse_request(&mut ctx).is_ok() && !ctx.is_not_found() {
        let _ = validator.send_headers(&mut ctx);
    }
});
