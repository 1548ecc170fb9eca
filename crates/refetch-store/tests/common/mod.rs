// Shared library fixture for the store integration tests
//
// Two categories, four authors, ten books and their yearly sales. Book
// categories load eagerly; authors, category books and book sales are lazy.
#![allow(dead_code)]

use refetch_core::{Criteria, EngineError, EntityKey, Expr, LazyCollection, Managed, Value};
use refetch_store::{EntityManager, EntityMapping, FieldMapping, JoinRows, Migration, Record};

pub const LIBRARY_SCHEMA: &[Migration] = &[Migration::new(
    "001_library",
    r#"
    CREATE TABLE category (
        category_id INTEGER PRIMARY KEY,
        name TEXT NOT NULL
    );

    CREATE TABLE book (
        book_id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        category_id INTEGER NOT NULL REFERENCES category(category_id)
    );

    CREATE TABLE author (
        author_id INTEGER PRIMARY KEY,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL
    );

    CREATE TABLE book_author (
        book_id INTEGER NOT NULL REFERENCES book(book_id) ON DELETE CASCADE,
        author_id INTEGER NOT NULL REFERENCES author(author_id) ON DELETE CASCADE,
        PRIMARY KEY (book_id, author_id)
    );

    CREATE TABLE sale (
        book_id INTEGER NOT NULL REFERENCES book(book_id) ON DELETE CASCADE,
        year INTEGER NOT NULL,
        quantity INTEGER NOT NULL,
        PRIMARY KEY (book_id, year)
    );
    "#,
)];

pub const AUTHOR_IDS_BY_BOOK: [(i64, &[i64]); 10] = [
    (1, &[2]),
    (2, &[3]),
    (3, &[4]),
    (4, &[1]),
    (5, &[4]),
    (6, &[1, 2, 3]),
    (7, &[2, 3]),
    (8, &[1, 3, 4]),
    (9, &[1, 2]),
    (10, &[4]),
];

pub struct Category {
    pub category_id: i64,
    pub name: String,
    pub books: LazyCollection<Managed<Book>>,
}

impl EntityMapping for Category {
    const NAME: &'static str = "Category";
    const TABLE: &'static str = "category";
    const FIELDS: &'static [FieldMapping] = &[
        FieldMapping::id("categoryId", "category_id"),
        FieldMapping::column("name", "name"),
    ];

    fn identifier(&self) -> EntityKey {
        EntityKey::single("categoryId", self.category_id)
    }

    fn hydrate(record: &Record, em: &EntityManager) -> refetch_store::Result<Self> {
        let category_id = record.int("category_id")?;
        Ok(Self {
            category_id,
            name: record.text("name")?,
            books: em.matching::<Book>(
                &Criteria::new().and_where(Expr::eq("category", category_id)),
            )?,
        })
    }

    fn column_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("category_id", self.category_id.into()),
            ("name", self.name.clone().into()),
        ]
    }
}

pub struct Book {
    pub book_id: i64,
    pub title: String,
    pub category: Managed<Category>,
    pub authors: LazyCollection<Managed<Author>>,
    pub sales: LazyCollection<Managed<Sale>>,
}

impl std::fmt::Debug for Book {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Book")
            .field("book_id", &self.book_id)
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

impl Book {
    pub fn category_id(&self) -> i64 {
        self.category.borrow().category_id
    }

    pub fn add_author(&mut self, author: &Managed<Author>) -> refetch_store::Result<()> {
        self.authors.add_instance(author.clone())
    }

    pub fn author_ids(&self) -> refetch_store::Result<Vec<i64>> {
        Ok(self
            .authors
            .iter()?
            .map(|author| author.borrow().author_id)
            .collect())
    }
}

impl EntityMapping for Book {
    const NAME: &'static str = "Book";
    const TABLE: &'static str = "book";
    const FIELDS: &'static [FieldMapping] = &[
        FieldMapping::id("bookId", "book_id"),
        FieldMapping::column("title", "title"),
        FieldMapping::column("category", "category_id"),
    ];

    fn identifier(&self) -> EntityKey {
        EntityKey::single("bookId", self.book_id)
    }

    fn hydrate(record: &Record, em: &EntityManager) -> refetch_store::Result<Self> {
        let book_id = record.int("book_id")?;
        let category_id = record.int("category_id")?;
        let category = em
            .find::<Category>(&EntityKey::single("categoryId", category_id))?
            .ok_or_else(|| {
                EngineError::persistence(format!("Book {} has no category", book_id))
            })?;
        Ok(Self {
            book_id,
            title: record.text("title")?,
            category,
            authors: em.many_to_many::<Author>("book_author", "book_id", book_id, "author_id")?,
            sales: em.matching::<Sale>(&Criteria::new().and_where(Expr::eq("book", book_id)))?,
        })
    }

    fn column_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("book_id", self.book_id.into()),
            ("title", self.title.clone().into()),
            ("category_id", self.category_id().into()),
        ]
    }

    // Book owns the book_author association
    fn join_rows(&self) -> Vec<JoinRows> {
        if !self.authors.is_initialized() {
            return Vec::new();
        }
        self.authors
            .to_vec()
            .map(|authors| {
                vec![JoinRows::new(
                    "book_author",
                    "book_id",
                    self.book_id,
                    "author_id",
                    &authors,
                )]
            })
            .unwrap_or_default()
    }
}

pub struct Author {
    pub author_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub books: LazyCollection<Managed<Book>>,
}

impl EntityMapping for Author {
    const NAME: &'static str = "Author";
    const TABLE: &'static str = "author";
    const FIELDS: &'static [FieldMapping] = &[
        FieldMapping::id("authorId", "author_id"),
        FieldMapping::column("firstName", "first_name"),
        FieldMapping::column("lastName", "last_name"),
    ];

    fn identifier(&self) -> EntityKey {
        EntityKey::single("authorId", self.author_id)
    }

    fn hydrate(record: &Record, em: &EntityManager) -> refetch_store::Result<Self> {
        let author_id = record.int("author_id")?;
        Ok(Self {
            author_id,
            first_name: record.text("first_name")?,
            last_name: record.text("last_name")?,
            books: em.many_to_many::<Book>("book_author", "author_id", author_id, "book_id")?,
        })
    }

    fn column_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("author_id", self.author_id.into()),
            ("first_name", self.first_name.clone().into()),
            ("last_name", self.last_name.clone().into()),
        ]
    }
}

pub struct Sale {
    pub book: Managed<Book>,
    pub year: i64,
    pub quantity: i64,
}

impl EntityMapping for Sale {
    const NAME: &'static str = "Sale";
    const TABLE: &'static str = "sale";
    const FIELDS: &'static [FieldMapping] = &[
        FieldMapping::id("book", "book_id"),
        FieldMapping::id("year", "year"),
        FieldMapping::column("quantity", "quantity"),
    ];

    fn identifier(&self) -> EntityKey {
        EntityKey::new()
            .with("book", self.book.borrow().book_id)
            .with("year", self.year)
    }

    fn hydrate(record: &Record, em: &EntityManager) -> refetch_store::Result<Self> {
        let book_id = record.int("book_id")?;
        let book = em
            .find::<Book>(&EntityKey::single("bookId", book_id))?
            .ok_or_else(|| EngineError::persistence(format!("Sale of unknown book {}", book_id)))?;
        Ok(Self {
            book,
            year: record.int("year")?,
            quantity: record.int("quantity")?,
        })
    }

    fn column_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("book_id", self.book.borrow().book_id.into()),
            ("year", self.year.into()),
            ("quantity", self.quantity.into()),
        ]
    }
}

/// Entity manager over a freshly seeded in-memory library
pub fn library() -> EntityManager {
    let em = EntityManager::open_in_memory().expect("Failed to open in-memory database");
    register_library(&em);
    em.apply_migrations(LIBRARY_SCHEMA)
        .expect("Failed to apply library schema");
    seed(&em);
    em
}

pub fn register_library(em: &EntityManager) {
    em.register::<Category>().expect("Failed to register Category");
    em.register::<Book>().expect("Failed to register Book");
    em.register::<Author>().expect("Failed to register Author");
    em.register::<Sale>().expect("Failed to register Sale");
}

/// Insert the fixture rows through raw SQL
pub fn seed(em: &EntityManager) {
    let conn = em.connection();
    for (id, name) in [(1, "Novel"), (2, "Computer science")] {
        conn.execute(
            "INSERT INTO category (category_id, name) VALUES (?1, ?2)",
            rusqlite::params![id, name],
        )
        .expect("Failed to insert category");
    }
    for (id, first, last) in [
        (1, "Ada", "Lovelace"),
        (2, "Alan", "Turing"),
        (3, "Grace", "Hopper"),
        (4, "Edsger", "Dijkstra"),
    ] {
        conn.execute(
            "INSERT INTO author (author_id, first_name, last_name) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, first, last],
        )
        .expect("Failed to insert author");
    }
    for (book_id, author_ids) in AUTHOR_IDS_BY_BOOK {
        conn.execute(
            "INSERT INTO book (book_id, title, category_id) VALUES (?1, ?2, ?3)",
            rusqlite::params![book_id, format!("Book {}", book_id), book_id % 2 + 1],
        )
        .expect("Failed to insert book");
        for author_id in author_ids {
            conn.execute(
                "INSERT INTO book_author (book_id, author_id) VALUES (?1, ?2)",
                rusqlite::params![book_id, author_id],
            )
            .expect("Failed to link author");
        }
    }
    for book_id in (1..=10).filter(|id| *id != 8) {
        let years: &[i64] = if book_id == 9 { &[2019] } else { &[2018, 2019] };
        for year in years {
            conn.execute(
                "INSERT INTO sale (book_id, year, quantity) VALUES (?1, ?2, ?3)",
                rusqlite::params![book_id, year, book_id * 1000 + year % 100],
            )
            .expect("Failed to insert sale");
        }
    }
}

pub fn book_key(book_id: i64) -> EntityKey {
    EntityKey::single("bookId", book_id)
}

pub fn author_key(author_id: i64) -> EntityKey {
    EntityKey::single("authorId", author_id)
}

pub fn category_key(category_id: i64) -> EntityKey {
    EntityKey::single("categoryId", category_id)
}

pub fn find_book(em: &EntityManager, book_id: i64) -> Managed<Book> {
    em.find::<Book>(&book_key(book_id))
        .expect("Failed to find book")
        .expect("Book not seeded")
}

pub fn find_author(em: &EntityManager, author_id: i64) -> Managed<Author> {
    em.find::<Author>(&author_key(author_id))
        .expect("Failed to find author")
        .expect("Author not seeded")
}

pub fn find_category(em: &EntityManager, category_id: i64) -> Managed<Category> {
    em.find::<Category>(&category_key(category_id))
        .expect("Failed to find category")
        .expect("Category not seeded")
}

/// Ids of every book except `excluded`, read without touching the session
pub fn book_ids_except(em: &EntityManager, excluded: i64) -> Vec<i64> {
    let mut stmt = em
        .connection()
        .prepare("SELECT book_id FROM book WHERE book_id <> ?1 ORDER BY book_id")
        .expect("Failed to prepare book ids query");
    stmt.query_map([excluded], |row| row.get(0))
        .expect("Failed to query book ids")
        .collect::<Result<Vec<i64>, _>>()
        .expect("Failed to read book ids")
}

/// Number of book_author rows matching a condition on `author_id`
pub fn count_links(em: &EntityManager, condition: &str, author_id: i64) -> i64 {
    em.connection()
        .query_row(
            &format!("SELECT COUNT(*) FROM book_author WHERE author_id {} ?1", condition),
            [author_id],
            |row| row.get(0),
        )
        .expect("Failed to count links")
}

/// Tree node whose parent loads eagerly
#[derive(Debug)]
pub struct Node {
    pub node_id: i64,
    pub parent: Option<Managed<Node>>,
}

impl EntityMapping for Node {
    const NAME: &'static str = "Node";
    const TABLE: &'static str = "node";
    const FIELDS: &'static [FieldMapping] = &[
        FieldMapping::id("nodeId", "node_id"),
        FieldMapping::column("parent", "parent_id"),
    ];

    fn identifier(&self) -> EntityKey {
        EntityKey::single("nodeId", self.node_id)
    }

    fn hydrate(record: &Record, em: &EntityManager) -> refetch_store::Result<Self> {
        let parent = match record.opt_int("parent_id")? {
            Some(parent_id) => em.find::<Node>(&node_key(parent_id))?,
            None => None,
        };
        Ok(Self {
            node_id: record.int("node_id")?,
            parent,
        })
    }

    fn column_values(&self) -> Vec<(&'static str, Value)> {
        let parent_id = self.parent.as_ref().map(|p| p.borrow().node_id);
        vec![
            ("node_id", self.node_id.into()),
            ("parent_id", parent_id.into()),
        ]
    }
}

/// Entity manager over nodes 1 and 2 pointing at each other, and a chain 4 -> 3
pub fn node_graph() -> EntityManager {
    let em = EntityManager::open_in_memory().expect("Failed to open in-memory database");
    em.register::<Node>().expect("Failed to register Node");
    em.connection()
        .execute_batch(
            r#"
            CREATE TABLE node (node_id INTEGER PRIMARY KEY, parent_id INTEGER);
            INSERT INTO node (node_id, parent_id) VALUES (1, 2), (2, 1), (3, NULL), (4, 3);
            "#,
        )
        .expect("Failed to seed nodes");
    em
}

pub fn node_key(node_id: i64) -> EntityKey {
    EntityKey::single("nodeId", node_id)
}
