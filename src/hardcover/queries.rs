//! GraphQL documents sent to Hardcover. Field selections must cover
//! everything the wire types in [`super::types`] deserialize.

pub(crate) const EDITION_FIELDS: &str =
    "id book_id asin isbn_13 reading_format_id audio_seconds";

pub(crate) const USER_BOOK_FIELDS: &str = "id book_id edition_id status_id owned";

pub(crate) const SESSION_FIELDS: &str =
    "id user_book_id progress_seconds started_at finished_at edition_id";

pub(crate) fn editions_by_asin() -> String {
    format!(
        "query EditionsByAsin($asin: String!) {{
            editions(where: {{asin: {{_eq: $asin}}, reading_format_id: {{_eq: 2}}}}, limit: 5) {{
                {EDITION_FIELDS}
            }}
        }}"
    )
}

pub(crate) fn editions_by_isbn13() -> String {
    format!(
        "query EditionsByIsbn13($isbn: String!) {{
            editions(where: {{isbn_13: {{_eq: $isbn}}}}, limit: 5) {{
                {EDITION_FIELDS}
            }}
        }}"
    )
}

pub(crate) fn editions_by_isbn10() -> String {
    format!(
        "query EditionsByIsbn10($isbn: String!) {{
            editions(where: {{isbn_10: {{_eq: $isbn}}}}, limit: 5) {{
                {EDITION_FIELDS}
            }}
        }}"
    )
}

pub(crate) fn books_by_title_author() -> String {
    "query BooksByTitleAuthor($title: String!, $author: String!) {
        books(
            where: {
                title: {_ilike: $title},
                contributions: {author: {name: {_ilike: $author}}}
            },
            order_by: {users_count: desc},
            limit: 5
        ) { id title canonical_id }
    }"
    .to_string()
}

pub(crate) fn book_by_id() -> String {
    "query BookById($id: Int!) {
        books_by_pk(id: $id) { id title canonical_id }
    }"
    .to_string()
}

pub(crate) fn edition_by_id() -> String {
    format!(
        "query EditionById($id: Int!) {{
            editions_by_pk(id: $id) {{ {EDITION_FIELDS} }}
        }}"
    )
}

pub(crate) fn editions_by_book() -> String {
    format!(
        "query EditionsByBook($bookId: Int!) {{
            editions(where: {{book_id: {{_eq: $bookId}}}}, order_by: {{users_count: desc}}) {{
                {EDITION_FIELDS}
            }}
        }}"
    )
}

pub(crate) fn user_book_by_book() -> String {
    format!(
        "query UserBookByBook($bookId: Int!) {{
            me {{
                user_books(where: {{book_id: {{_eq: $bookId}}}}) {{ {USER_BOOK_FIELDS} }}
            }}
        }}"
    )
}

pub(crate) fn create_user_book() -> String {
    format!(
        "mutation CreateUserBook($object: UserBookCreateInput!) {{
            insert_user_book(object: $object) {{
                user_book {{ {USER_BOOK_FIELDS} }}
            }}
        }}"
    )
}

pub(crate) fn update_user_book_status() -> String {
    "mutation UpdateUserBookStatus($id: Int!, $statusId: Int!) {
        update_user_book(id: $id, object: {status_id: $statusId}) { id }
    }"
    .to_string()
}

pub(crate) fn sessions_by_user_book() -> String {
    format!(
        "query SessionsByUserBook($userBookId: Int!) {{
            user_book_reads(where: {{user_book_id: {{_eq: $userBookId}}}}, order_by: {{id: asc}}) {{
                {SESSION_FIELDS}
            }}
        }}"
    )
}

pub(crate) fn insert_session() -> String {
    format!(
        "mutation InsertSession($userBookId: Int!, $object: DatesReadInput!) {{
            insert_user_book_read(user_book_id: $userBookId, user_book_read: $object) {{
                user_book_read {{ {SESSION_FIELDS} }}
            }}
        }}"
    )
}

pub(crate) fn update_session() -> String {
    "mutation UpdateSession($id: Int!, $object: DatesReadInput!) {
        update_user_book_read(id: $id, object: $object) { id }
    }"
    .to_string()
}

pub(crate) fn edition_ownership() -> String {
    "query EditionOwnership($editionId: Int!) {
        me {
            list_books(
                where: {edition_id: {_eq: $editionId}, list: {slug: {_eq: \"owned\"}}}
            ) { id }
        }
    }"
    .to_string()
}

pub(crate) fn mark_edition_owned() -> String {
    "mutation MarkEditionOwned($editionId: Int!) {
        ownership_add(edition_id: $editionId) { id }
    }"
    .to_string()
}
