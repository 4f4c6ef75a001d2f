//! Content Store and index behavior against a real SQLite file.

mod common;

use common::*;
use exopedia::blob::BlobStore;
use exopedia::chunk::chunk_text;
use exopedia::index::SemanticMatcher;
use exopedia::models::PageUpdate;
use sqlx::Row;

#[tokio::test]
async fn test_colliding_slugs_get_numbered() {
    let env = test_env(ScriptedModel::new()).await;

    let a = seed_page(&env.services, "Titan", "타이탄", "토성의 위성.", "# 타이탄").await;
    let b = seed_page(&env.services, "titan", "타이탄 2", "또 다른 타이탄.", "# 타이탄 2").await;
    let c = seed_page(&env.services, " TITAN!", "타이탄 3", "세 번째.", "# 타이탄 3").await;

    assert_eq!(a.canonical_slug, "titan");
    assert_eq!(b.canonical_slug, "titan-1");
    assert_eq!(c.canonical_slug, "titan-2");
    assert_eq!(c.storage_object_path, "pages/titan-2.md");

    let stored = env.blobs.get("pages/titan-1.md").await.unwrap();
    assert_eq!(stored.as_deref(), Some("# 타이탄 2"));
}

#[tokio::test]
async fn test_hangul_only_slug_falls_back() {
    let env = test_env(ScriptedModel::new()).await;
    let first = seed_page(&env.services, "타이탄", "타이탄", "요약", "# 타이탄").await;
    let second = seed_page(&env.services, "토성", "토성", "요약", "# 토성").await;
    assert_eq!(first.canonical_slug, "page");
    assert_eq!(second.canonical_slug, "page-1");
}

#[tokio::test]
async fn test_update_rebuilds_chunks() {
    let env = test_env_with(ScriptedModel::new(), |c| c.chunking.max_chars = 50).await;
    let long = "타이탄의 메탄 바다는 넓었다. ".repeat(12);
    let page = seed_page(&env.services, "titan", "타이탄", "토성의 위성.", &long).await;

    let before: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_chunks WHERE page_id = ?")
        .bind(&page.page_id)
        .fetch_one(&env.services.pool)
        .await
        .unwrap();
    assert!(before > 1);

    let short = "# 타이탄\n\n짧아졌다.";
    env.services
        .pages
        .persist_page_update(PageUpdate {
            slug: "titan".to_string(),
            markdown: short.to_string(),
            summary: Some("새 요약.".to_string()),
        })
        .await
        .unwrap();

    let rows = sqlx::query(
        "SELECT chunk_index, text, hash, embedding FROM content_chunks WHERE page_id = ? ORDER BY chunk_index",
    )
    .bind(&page.page_id)
    .fetch_all(&env.services.pool)
    .await
    .unwrap();
    let expected = chunk_text(&page.page_id, short, 50);
    assert_eq!(rows.len(), expected.len());
    for (row, chunk) in rows.iter().zip(&expected) {
        assert_eq!(row.get::<i64, _>("chunk_index"), chunk.chunk_index);
        assert_eq!(row.get::<String, _>("text"), chunk.text);
        assert_eq!(row.get::<String, _>("hash"), chunk.hash);
        assert!(row.get::<Option<Vec<u8>>, _>("embedding").is_some());
    }

    let meta = env.services.pages.get_meta("titan").await.unwrap().unwrap();
    assert_eq!(meta.summary, "새 요약.");
    assert_eq!(markdown_of(&env.services, "titan").await, short);
}

#[tokio::test]
async fn test_update_of_missing_page_fails() {
    let env = test_env(ScriptedModel::new()).await;
    let err = env
        .services
        .pages
        .persist_page_update(PageUpdate {
            slug: "nowhere".to_string(),
            markdown: "# x".to_string(),
            summary: None,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("page not found"));
}

#[tokio::test]
async fn test_missing_blob_reads_as_absent() {
    let env = test_env(ScriptedModel::new()).await;
    seed_page(&env.services, "titan", "타이탄", "요약", "# 타이탄").await;
    env.blobs.remove("pages/titan.md");

    assert!(env.services.pages.get_page("titan").await.unwrap().is_none());
    assert!(env.services.pages.get_meta("titan").await.unwrap().is_some());
}

#[tokio::test]
async fn test_view_counts_accumulate() {
    let env = test_env(ScriptedModel::new()).await;
    let page = seed_page(&env.services, "titan", "타이탄", "요약", "# 타이탄").await;

    assert_eq!(env.services.pages.view_count(&page.page_id).await.unwrap(), 0);
    assert_eq!(env.services.pages.record_view(&page.page_id).await.unwrap(), 1);
    assert_eq!(env.services.pages.record_view(&page.page_id).await.unwrap(), 2);

    let meta = env.services.pages.get_meta("titan").await.unwrap().unwrap();
    assert!(meta.last_visited_at.is_some());
}

#[tokio::test]
async fn test_semantic_and_retrieval_search() {
    let env = test_env(ScriptedModel::new()).await;
    seed_page(
        &env.services,
        "generation-ship",
        "세대 항해선",
        "세대 항해선 설계 사회",
        "# 세대 항해선\n\n항해선 내부의 농장 구역은 수백 년을 버텼다.",
    )
    .await;
    seed_page(
        &env.services,
        "fusion-stations",
        "핵융합 정거장",
        "핵융합 정거장 에너지",
        "# 핵융합 정거장\n\n정거장은 중수소를 태웠다.",
    )
    .await;

    let matches = env
        .services
        .matcher
        .search("세대 항해선 설계 사회", 5, 0.9)
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].slug, "generation-ship");
    assert!(matches[0].score > 0.99);

    let hits = env
        .services
        .retrieval
        .search("정거장은 중수소를 태웠다.", 1)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].slug, "fusion-stations");
}
