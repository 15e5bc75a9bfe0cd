//! Mapped types shared by the integration suites.

#![allow(dead_code)]

use objmap::{
    Database, Error, Image, InsertStatement, ObjectRef, ObjectStatements, ObjectTraits, Result,
    SelectStatement, SharedBinding, SqliteConnection, StatementKind, Value,
};
use objmap::{Binding, ContainerFactory, DeleteStatement};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub const SCHEMA: &str = "
    CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT NOT NULL, mentor INTEGER);
    CREATE TABLE account (id INTEGER PRIMARY KEY, owner TEXT NOT NULL, balance INTEGER NOT NULL,
                          version INTEGER NOT NULL);
    CREATE TABLE author (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
    CREATE TABLE author_tag (author_id INTEGER NOT NULL, seq INTEGER NOT NULL, tag TEXT NOT NULL,
                             PRIMARY KEY (author_id, seq));
    CREATE TABLE node (id INTEGER PRIMARY KEY, link INTEGER, peer INTEGER);
";

thread_local! {
    static EVENTS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    static TAG_CACHES_BUILT: Cell<usize> = const { Cell::new(0) };
}

pub fn open() -> Database {
    let db = Database::open_memory().unwrap();
    db.execute_raw(SCHEMA).unwrap();
    take_events();
    db
}

fn record(event: String) {
    EVENTS.with(|e| e.borrow_mut().push(event));
}

/// Events recorded on this thread since the last call.
pub fn take_events() -> Vec<String> {
    EVENTS.with(|e| std::mem::take(&mut *e.borrow_mut()))
}

pub fn tag_caches_built() -> usize {
    TAG_CACHES_BUILT.with(Cell::get)
}

#[derive(Debug, Default)]
pub struct IntIdImage {
    id: i64,
}

impl Image for IntIdImage {}

fn bind_int_id(slots: &mut [Value], image: &IntIdImage) {
    slots[0] = Value::BigInt(image.id);
}

fn column<T: TryFrom<Value, Error = Error>>(row: &[Value], i: usize) -> Result<T> {
    T::try_from(row[i].clone())
}

// Person: a self-referencing type. Loading a person loads their mentor.

#[derive(Debug, Clone)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub mentor_id: Option<i64>,
    pub mentor: Option<ObjectRef<Person>>,
}

impl Person {
    pub fn new(id: i64, name: &str, mentor_id: Option<i64>) -> Self {
        Self {
            id,
            name: name.to_string(),
            mentor_id,
            mentor: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct PersonImage {
    id: i64,
    name: String,
    mentor: Option<i64>,
}

impl Image for PersonImage {}

impl ObjectTraits for Person {
    type Id = i64;
    type Image = PersonImage;
    type IdImage = IntIdImage;

    const TABLE_NAME: &'static str = "person";
    const COLUMN_COUNT: usize = 3;
    const ID_COLUMN_COUNT: usize = 1;

    const PERSIST_STATEMENT: &'static str =
        "INSERT INTO person (id, name, mentor) VALUES (?1, ?2, ?3)";
    const FIND_STATEMENT: &'static str = "SELECT id, name, mentor FROM person WHERE id = ?1";
    const UPDATE_STATEMENT: &'static str =
        "UPDATE person SET name = ?1, mentor = ?2 WHERE id = ?3";
    const ERASE_STATEMENT: &'static str = "DELETE FROM person WHERE id = ?1";

    fn id(&self) -> i64 {
        self.id
    }

    fn init_image(image: &mut PersonImage, obj: &Self) {
        image.id = obj.id;
        image.name.clone_from(&obj.name);
        image.mentor = obj.mentor_id;
    }

    fn bind_image(slots: &mut [Value], image: &PersonImage, kind: StatementKind) {
        let rest = match kind {
            StatementKind::Update => &mut slots[..],
            StatementKind::Select | StatementKind::Insert => {
                slots[0] = Value::BigInt(image.id);
                &mut slots[1..]
            }
        };
        rest[0] = Value::from(image.name.as_str());
        rest[1] = Value::from(image.mentor);
    }

    fn init_id_image(image: &mut IntIdImage, id: &i64) {
        image.id = *id;
    }

    fn bind_id(slots: &mut [Value], image: &IntIdImage) {
        bind_int_id(slots, image);
    }

    fn init_image_from_row(image: &mut PersonImage, row: &[Value]) -> Result<()> {
        image.id = column(row, 0)?;
        image.name = column(row, 1)?;
        image.mentor = column(row, 2)?;
        Ok(())
    }

    fn init_object(image: &PersonImage, db: &mut Database) -> Result<Self> {
        record(format!("init {}", image.id));
        let mentor = match image.mentor {
            Some(id) => Some(db.load::<Person>(&id)?),
            None => None,
        };
        Ok(Self {
            id: image.id,
            name: image.name.clone(),
            mentor_id: image.mentor,
            mentor,
        })
    }

    fn post_load(db: &mut Database, target: ObjectRef<Self>) -> Result<()> {
        if let Some(person) = db.get(target) {
            record(format!("post_load {}", person.id));
        }
        Ok(())
    }
}

// Account: carries a managed version column.

#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub owner: String,
    pub balance: i64,
    pub version: i64,
}

impl Account {
    pub fn new(id: i64, owner: &str, balance: i64) -> Self {
        Self {
            id,
            owner: owner.to_string(),
            balance,
            version: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct AccountImage {
    id: i64,
    owner: String,
    balance: i64,
    version: i64,
}

impl Image for AccountImage {}

impl ObjectTraits for Account {
    type Id = i64;
    type Image = AccountImage;
    type IdImage = IntIdImage;

    const TABLE_NAME: &'static str = "account";
    const COLUMN_COUNT: usize = 4;
    const ID_COLUMN_COUNT: usize = 1;
    const MANAGED_OPTIMISTIC_COLUMN_COUNT: usize = 1;

    const PERSIST_STATEMENT: &'static str =
        "INSERT INTO account (id, owner, balance, version) VALUES (?1, ?2, ?3, 1)";
    const FIND_STATEMENT: &'static str =
        "SELECT id, owner, balance, version FROM account WHERE id = ?1";
    const UPDATE_STATEMENT: &'static str = "UPDATE account SET owner = ?1, balance = ?2, \
         version = version + 1 WHERE id = ?3 AND version = ?4";
    const ERASE_STATEMENT: &'static str = "DELETE FROM account WHERE id = ?1";
    const OPTIMISTIC_ERASE_STATEMENT: Option<&'static str> =
        Some("DELETE FROM account WHERE id = ?1 AND version = ?2");

    fn id(&self) -> i64 {
        self.id
    }

    fn init_image(image: &mut AccountImage, obj: &Self) {
        image.id = obj.id;
        image.owner.clone_from(&obj.owner);
        image.balance = obj.balance;
        image.version = obj.version;
    }

    fn bind_image(slots: &mut [Value], image: &AccountImage, kind: StatementKind) {
        let data = [
            Value::from(image.owner.as_str()),
            Value::BigInt(image.balance),
        ];
        match kind {
            StatementKind::Update => slots[..2].clone_from_slice(&data),
            StatementKind::Insert => {
                slots[0] = Value::BigInt(image.id);
                slots[1..3].clone_from_slice(&data);
            }
            StatementKind::Select => {
                slots[0] = Value::BigInt(image.id);
                slots[1..3].clone_from_slice(&data);
                slots[3] = Value::BigInt(image.version);
            }
        }
    }

    fn init_id_image(image: &mut IntIdImage, id: &i64) {
        image.id = *id;
    }

    fn bind_id(slots: &mut [Value], image: &IntIdImage) {
        bind_int_id(slots, image);
    }

    fn init_image_from_row(image: &mut AccountImage, row: &[Value]) -> Result<()> {
        image.id = column(row, 0)?;
        image.owner = column(row, 1)?;
        image.balance = column(row, 2)?;
        image.version = column(row, 3)?;
        Ok(())
    }

    fn init_object(image: &AccountImage, _db: &mut Database) -> Result<Self> {
        Ok(Self {
            id: image.id,
            owner: image.owner.clone(),
            balance: image.balance,
            version: image.version,
        })
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

// Author: a collection-valued member stored through a container cache.

#[derive(Debug, Clone)]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Default)]
pub struct AuthorImage {
    id: i64,
    name: String,
}

impl Image for AuthorImage {}

/// Statements for the `author_tag` member table.
pub struct TagStatements {
    row: SharedBinding,
    tag: SharedBinding,
    insert: InsertStatement,
    select: SelectStatement,
    delete: DeleteStatement,
}

fn tag_statements(conn: &Rc<SqliteConnection>, id: &SharedBinding) -> Result<Box<dyn Any>> {
    TAG_CACHES_BUILT.with(|n| n.set(n.get() + 1));
    let row = Binding::shared(3);
    let tag = Binding::shared(1);
    Ok(Box::new(TagStatements {
        insert: InsertStatement::new(
            conn,
            "INSERT INTO author_tag (author_id, seq, tag) VALUES (?1, ?2, ?3)",
            &row,
        )?,
        select: SelectStatement::new(
            conn,
            "SELECT tag FROM author_tag WHERE author_id = ?1 ORDER BY seq",
            id,
            &tag,
        )?,
        delete: DeleteStatement::new(conn, "DELETE FROM author_tag WHERE author_id = ?1", id)?,
        row,
        tag,
    }))
}

impl ObjectTraits for Author {
    type Id = i64;
    type Image = AuthorImage;
    type IdImage = IntIdImage;

    const TABLE_NAME: &'static str = "author";
    const COLUMN_COUNT: usize = 2;
    const ID_COLUMN_COUNT: usize = 1;

    const PERSIST_STATEMENT: &'static str = "INSERT INTO author (id, name) VALUES (?1, ?2)";
    const FIND_STATEMENT: &'static str = "SELECT id, name FROM author WHERE id = ?1";
    const UPDATE_STATEMENT: &'static str = "UPDATE author SET name = ?1 WHERE id = ?2";
    const ERASE_STATEMENT: &'static str = "DELETE FROM author WHERE id = ?1";

    fn id(&self) -> i64 {
        self.id
    }

    fn init_image(image: &mut AuthorImage, obj: &Self) {
        image.id = obj.id;
        image.name.clone_from(&obj.name);
    }

    fn bind_image(slots: &mut [Value], image: &AuthorImage, kind: StatementKind) {
        match kind {
            StatementKind::Update => slots[0] = Value::from(image.name.as_str()),
            StatementKind::Select | StatementKind::Insert => {
                slots[0] = Value::BigInt(image.id);
                slots[1] = Value::from(image.name.as_str());
            }
        }
    }

    fn init_id_image(image: &mut IntIdImage, id: &i64) {
        image.id = *id;
    }

    fn bind_id(slots: &mut [Value], image: &IntIdImage) {
        bind_int_id(slots, image);
    }

    fn init_image_from_row(image: &mut AuthorImage, row: &[Value]) -> Result<()> {
        image.id = column(row, 0)?;
        image.name = column(row, 1)?;
        Ok(())
    }

    fn init_object(image: &AuthorImage, _db: &mut Database) -> Result<Self> {
        Ok(Self {
            id: image.id,
            name: image.name.clone(),
            tags: Vec::new(),
        })
    }

    fn container_cache_factory() -> Option<ContainerFactory> {
        Some(tag_statements)
    }

    fn persist_containers(sts: &mut ObjectStatements<Self>, obj: &Self) -> Result<()> {
        let tags = sts.container_statement_cache::<TagStatements>()?;
        for (seq, tag) in obj.tags.iter().enumerate() {
            {
                let mut row = tags.row.borrow_mut();
                let slots = row.slots_mut();
                slots[0] = Value::BigInt(obj.id);
                slots[1] = Value::BigInt(seq as i64);
                slots[2] = Value::from(tag.as_str());
            }
            tags.insert.execute()?;
        }
        Ok(())
    }

    fn load_containers(sts: &mut ObjectStatements<Self>, obj: &mut Self) -> Result<()> {
        let tags = sts.container_statement_cache::<TagStatements>()?;
        obj.tags.clear();
        tags.select.execute()?;
        while tags.select.fetch()? {
            let tag = column(tags.tag.borrow().slots(), 0)?;
            obj.tags.push(tag);
        }
        tags.select.free_result();
        Ok(())
    }

    fn erase_containers(sts: &mut ObjectStatements<Self>) -> Result<()> {
        let tags = sts.container_statement_cache::<TagStatements>()?;
        tags.delete.execute()?;
        Ok(())
    }
}

// Node: `link` is loaded while the node is built, `peer` from post-load.

#[derive(Debug, Clone)]
pub struct Node {
    pub id: i64,
    pub link_id: Option<i64>,
    pub peer_id: Option<i64>,
    pub link: Option<ObjectRef<Node>>,
}

#[derive(Debug, Default)]
pub struct NodeImage {
    id: i64,
    link: Option<i64>,
    peer: Option<i64>,
}

impl Image for NodeImage {}

impl ObjectTraits for Node {
    type Id = i64;
    type Image = NodeImage;
    type IdImage = IntIdImage;

    const TABLE_NAME: &'static str = "node";
    const COLUMN_COUNT: usize = 3;
    const ID_COLUMN_COUNT: usize = 1;

    const PERSIST_STATEMENT: &'static str = "INSERT INTO node (id, link, peer) VALUES (?1, ?2, ?3)";
    const FIND_STATEMENT: &'static str = "SELECT id, link, peer FROM node WHERE id = ?1";
    const UPDATE_STATEMENT: &'static str = "UPDATE node SET link = ?1, peer = ?2 WHERE id = ?3";
    const ERASE_STATEMENT: &'static str = "DELETE FROM node WHERE id = ?1";

    fn id(&self) -> i64 {
        self.id
    }

    fn init_image(image: &mut NodeImage, obj: &Self) {
        image.id = obj.id;
        image.link = obj.link_id;
        image.peer = obj.peer_id;
    }

    fn bind_image(slots: &mut [Value], image: &NodeImage, kind: StatementKind) {
        let rest = match kind {
            StatementKind::Update => &mut slots[..],
            StatementKind::Select | StatementKind::Insert => {
                slots[0] = Value::BigInt(image.id);
                &mut slots[1..]
            }
        };
        rest[0] = Value::from(image.link);
        rest[1] = Value::from(image.peer);
    }

    fn init_id_image(image: &mut IntIdImage, id: &i64) {
        image.id = *id;
    }

    fn bind_id(slots: &mut [Value], image: &IntIdImage) {
        bind_int_id(slots, image);
    }

    fn init_image_from_row(image: &mut NodeImage, row: &[Value]) -> Result<()> {
        image.id = column(row, 0)?;
        image.link = column(row, 1)?;
        image.peer = column(row, 2)?;
        Ok(())
    }

    fn init_object(image: &NodeImage, db: &mut Database) -> Result<Self> {
        let link = match image.link {
            Some(id) => Some(db.load::<Node>(&id)?),
            None => None,
        };
        Ok(Self {
            id: image.id,
            link_id: image.link,
            peer_id: image.peer,
            link,
        })
    }

    fn post_load(db: &mut Database, target: ObjectRef<Self>) -> Result<()> {
        let Some((id, peer)) = db.get(target).map(|n| (n.id, n.peer_id)) else {
            return Ok(());
        };
        if let Some(peer) = peer {
            let handle = db.load::<Node>(&peer)?;
            let loaded = db.session().is_loaded(handle);
            record(format!("peer {} -> {} loaded={}", id, peer, loaded));
        }
        Ok(())
    }
}
