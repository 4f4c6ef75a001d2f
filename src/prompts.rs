//! System and user prompts for the decider and the two drafting modes.

use crate::models::PageMatch;

/// Shared rules of the fictional world every article must respect.
const WORLD_RULES: &str = "\
I. Writing
1. Every article is written in the past tense from the vantage point of the year 3025.
2. Every article is written in Korean.
3. Stay consistent with every existing article.
4. Every new article must add material beyond what research returned and must contain red links (/create/...) so the wiki keeps growing.
II. Physics
1. Present-day physics holds; the future is a logical extrapolation of it.
2. The laws of thermodynamics are absolute.
3. Energy is conserved; nothing is created from nothing, zero-point energy included.
4. Nothing, matter or information, travels at or above the speed of light. There is no warp drive.
5. Interstellar communication therefore suffers long delays.
III. Technology and society
1. Technology ages and fails; cutting-edge and obsolete systems coexist.
2. Securing and storing energy is the core of the economy, and the value of resources differs sharply from the Earth era.
IV. People
1. People are fundamentally self-interested.
2. Humanity never forms a single government.
3. Communication delay isolates colonies, which develop their own cultures, technologies and values, driving friction with the center.
V. Life and environment
1. There is no intelligent alien life; simple life such as microbes or plants may exist.
2. Terraforming is extremely slow; most people live in domes or underground cities.";

/// Fixed equivalence examples shown to the decider. Synonyms, spelling
/// variants and short/long forms match; broader or narrower topics do not.
const DECISION_EXAMPLES: &[(&str, &str, &str, &str)] = &[
    (
        "광속장벽",
        "빛의 속도 한계",
        "‘광속 장벽’과 동일 개념. 물질과 정보가 c를 넘을 수 없다는 사실이 정치·경제·문화에 미친 영향까지 요약.",
        "match: same concept under a different name",
    ),
    (
        "돔 도시",
        "화성 독립 도시국가",
        "혹독한 환경에 적응하여 독자적인 문화와 기술을 발전시킨 화성 정착민들의 자치 공동체들. 거대한 돔 도시나 지하 도시에 의존하여 삶을 영위했다.",
        "no match: the page is a broader topic that merely includes dome cities",
    ),
    (
        "세대 항해선",
        "세대 항해선",
        "수 세대에 걸쳐 항해하는 우주선의 설계, 사회 구조, 항해 전략을 다룸.",
        "match: same topic",
    ),
    (
        "알파 센타우리 상호연대",
        "알파 센타우리 | 상호연대",
        "알파 센타우리 식민지 연대체의 정치·사회 제도와 태양계와의 데이터 교환 구조.",
        "match: only the notation differs",
    ),
    (
        "헬륨-3 채굴",
        "에너지 경제학",
        "에너지 생산·저장·효율 전반을 다루는 상위 개념(헬륨-3 채굴은 하위 항목).",
        "no match: containment is not identity",
    ),
    (
        "저속 데이터 패킷 교환",
        "느린 패킷 데이터 교환",
        "항성간 통신에서의 저속·대용량 데이터 전송 프로토콜.",
        "match: synonyms",
    ),
    (
        "유로파 해저 도시",
        "유로파의 해저 도시",
        "유로파 빙하 아래 인프라와 사회 구조를 설명.",
        "match: only the phrasing differs",
    ),
    (
        "금성 부유 도시",
        "금성 기업령",
        "금성 상층 대기 도시를 지배하는 기업 통치 체제(부유 도시는 하위 요소).",
        "no match: parent/child topics",
    ),
    (
        "목성권 연맹",
        "목성권 공화국 연맹",
        "목성권 소규모 공화국들의 연합체.",
        "match: short form versus full name",
    ),
    (
        "타이탄 개척자",
        "타이탄과 그 너머의 개척자",
        "타이탄뿐 아니라 외태양계 전반의 개척 흐름을 포괄.",
        "no match: the link is narrower than the page",
    ),
];

pub fn decision_system_prompt() -> String {
    let mut s = String::from(
        "You decide whether an existing wiki page covers exactly the same topic as a clicked link, \
judging by the candidates' summaries and scores.\n\
If one candidate is the same topic, call redirect_to_existing(slug) with that candidate's slug. \
Otherwise call declare_no_existing(). Never call any other tool.\n\
Judge by the summary, not by title similarity. Synonyms, abbreviations, translations and \
notation differences match. A broader or narrower topic does not match.\n\nExamples:\n\n",
    );
    for (link, title, summary, verdict) in DECISION_EXAMPLES {
        s.push_str(&format!(
            "Link text: {}\nCandidate: title: {} | summary: {}\n-> {}\n\n",
            link, title, summary, verdict
        ));
    }
    s
}

pub fn decision_user_prompt(
    link_text: &str,
    target_slug: &str,
    context: &str,
    candidates: &[PageMatch],
) -> String {
    let candidates_json = serde_json::to_string(candidates).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Link text: \"{}\" ({})\nContext around the link: {}\n\n\
Top candidates from the page index:\n{}\n\n\
Task: decide whether a page on the same topic exists. If it does, call redirect_to_existing(slug); \
if not, call declare_no_existing(). Never call any page-creation tool.",
        link_text, target_slug, context, candidates_json
    )
}

/// What a drafting session is about.
#[derive(Debug, Clone)]
pub struct DraftBrief<'a> {
    pub source_slug: &'a str,
    pub source_title: &'a str,
    pub source_markdown: &'a str,
    pub target_slug: &'a str,
    pub link_text: &'a str,
    pub context: &'a str,
}

pub fn existing_mode_system_prompt(brief: &DraftBrief<'_>, existing_slug: &str) -> String {
    format!(
        "You edit wiki articles from the vantage point of the year 3025. Perform ONLY the \
existing-page branch.\n\nRules:\n{rules}\n\nCurrent task:\n\
- Source article: \"{title}\" ({source})\n\
- Clicked link text: \"{link}\" ({target})\n\
- Context around the link: {context}\n\
- Slug of the existing page on the same topic: {existing}\n\n\
Steps:\n\
1. Read the existing page with get_page.\n\
2. In the source article, replace the red link (/create/{target}) with the blue link (/wiki/{existing}). \
Only make small additions or corrections within the paragraph containing the link or the paragraphs \
next to it. No structural changes.\n\
3. Save with persist_page_update, then call finish_session.\n\
Never create a page (persist_new_page is forbidden).",
        rules = WORLD_RULES,
        title = brief.source_title,
        source = brief.source_slug,
        link = brief.link_text,
        target = brief.target_slug,
        context = brief.context,
        existing = existing_slug,
    )
}

pub fn new_mode_system_prompt(brief: &DraftBrief<'_>) -> String {
    format!(
        "You write wiki articles from the vantage point of the year 3025. Perform ONLY the \
new-page branch.\n\nRules:\n{rules}\n\nCurrent task:\n\
- Source article: \"{title}\" ({source})\n\
- Article to create: \"{link}\" ({target})\n\
- Context around the link: {context}\n\n\
Steps:\n\
1. Research the topic with search_content_index, at most once.\n\
2. Think through a summary and a draft body.\n\
3. Run search_content_index for parts of the draft, 1 to 3 times, as few as possible, and revise.\n\
4. Decide which terms in the revision deserve links.\n\
5. Always check them with batch_resolve_page_index. Read each returned summary and link to /wiki/{{slug}} \
only when the summary clearly describes the same topic, never on title similarity alone. When unsure keep \
/create/{{target-slug}}.\n\
6. Save the article with persist_new_page, exactly once. Pass {target} as proposedSlug; any other \
proposedSlug must be lowercase ASCII words joined by hyphens.\n\
7. In the source article, replace the red link with a blue link to the returned canonical slug \
(/wiki/{{canonicalSlug}}), editing only what is necessary, and save with persist_page_update.\n\
8. When every step has succeeded, call finish_session.\n\
Never take the existing-page branch.",
        rules = WORLD_RULES,
        title = brief.source_title,
        source = brief.source_slug,
        link = brief.link_text,
        target = brief.target_slug,
        context = brief.context,
    )
}

pub fn drafting_user_prompt(brief: &DraftBrief<'_>, existing_slug: Option<&str>) -> String {
    let focus = match existing_slug {
        Some(slug) => format!("Existing page slug: {}\n", slug),
        None => format!("Page to create: {}\n", brief.target_slug),
    };
    format!(
        "Full source article:\n\n{}\n\n{}Clicked link: \"{}\" ({})\nContext around the link: {}\n\n\
Proceed with the steps above.",
        brief.source_markdown, focus, brief.link_text, brief.target_slug, brief.context
    )
}

/// The first `max_chars` characters of `s`.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
