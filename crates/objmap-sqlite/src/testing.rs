//! Mapped types shared by the unit tests.

use crate::binding::StatementKind;
use crate::database::Database;
use crate::session::ObjectRef;
use crate::traits::{Image, ObjectTraits};
use objmap_core::{Result, Value};
use std::cell::{Cell, RefCell};

thread_local! {
    static POST_LOADS: RefCell<Vec<i64>> = const { RefCell::new(Vec::new()) };
    static GAUGE_LAYOUT: Cell<usize> = const { Cell::new(0) };
}

/// Ids passed to `Person::post_load` on this thread since the last call.
pub fn take_post_loads() -> Vec<i64> {
    POST_LOADS.with(|log| std::mem::take(&mut *log.borrow_mut()))
}

pub fn person_db() -> Database {
    let db = Database::open_memory().unwrap();
    db.execute_raw(
        "CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT NOT NULL, mentor INTEGER)",
    )
    .unwrap();
    db.execute_raw(
        "CREATE TABLE account (id INTEGER PRIMARY KEY, owner TEXT NOT NULL, version INTEGER NOT NULL)",
    )
    .unwrap();
    db.execute_raw("CREATE TABLE pet (id INTEGER PRIMARY KEY, owner INTEGER)")
        .unwrap();
    db.execute_raw(
        "CREATE TABLE gauge (id INTEGER PRIMARY KEY, label TEXT NOT NULL, version INTEGER NOT NULL)",
    )
    .unwrap();
    set_gauge_layout(0);
    take_post_loads();
    db
}

#[derive(Debug)]
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

#[derive(Debug, Default)]
pub struct IdImage {
    id: i64,
}

impl Image for IdImage {}

impl ObjectTraits for Person {
    type Id = i64;
    type Image = PersonImage;
    type IdImage = IdImage;

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
        let mut values = vec![
            Value::from(image.name.as_str()),
            Value::from(image.mentor),
        ];
        if kind != StatementKind::Update {
            values.insert(0, Value::BigInt(image.id));
        }
        for (slot, value) in slots.iter_mut().zip(values) {
            *slot = value;
        }
    }

    fn init_id_image(image: &mut IdImage, id: &i64) {
        image.id = *id;
    }

    fn bind_id(slots: &mut [Value], image: &IdImage) {
        slots[0] = Value::BigInt(image.id);
    }

    fn init_image_from_row(image: &mut PersonImage, row: &[Value]) -> Result<()> {
        image.id = i64::try_from(row[0].clone())?;
        image.name = String::try_from(row[1].clone())?;
        image.mentor = Option::<i64>::try_from(row[2].clone())?;
        Ok(())
    }

    fn init_object(image: &PersonImage, db: &mut Database) -> Result<Self> {
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
            let id = person.id;
            POST_LOADS.with(|log| log.borrow_mut().push(id));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Account {
    pub id: i64,
    pub owner: String,
    pub version: i64,
}

#[derive(Debug, Default)]
pub struct AccountImage {
    id: i64,
    owner: String,
    version: i64,
}

impl Image for AccountImage {}

impl ObjectTraits for Account {
    type Id = i64;
    type Image = AccountImage;
    type IdImage = IdImage;

    const TABLE_NAME: &'static str = "account";
    const COLUMN_COUNT: usize = 3;
    const ID_COLUMN_COUNT: usize = 1;
    const MANAGED_OPTIMISTIC_COLUMN_COUNT: usize = 1;

    const PERSIST_STATEMENT: &'static str =
        "INSERT INTO account (id, owner, version) VALUES (?1, ?2, 1)";
    const FIND_STATEMENT: &'static str = "SELECT id, owner, version FROM account WHERE id = ?1";
    const UPDATE_STATEMENT: &'static str =
        "UPDATE account SET owner = ?1, version = version + 1 WHERE id = ?2 AND version = ?3";
    const ERASE_STATEMENT: &'static str = "DELETE FROM account WHERE id = ?1";
    const OPTIMISTIC_ERASE_STATEMENT: Option<&'static str> =
        Some("DELETE FROM account WHERE id = ?1 AND version = ?2");

    fn id(&self) -> i64 {
        self.id
    }

    fn init_image(image: &mut AccountImage, obj: &Self) {
        image.id = obj.id;
        image.owner.clone_from(&obj.owner);
        image.version = obj.version;
    }

    fn bind_image(slots: &mut [Value], image: &AccountImage, kind: StatementKind) {
        match kind {
            StatementKind::Select => {
                slots[0] = Value::BigInt(image.id);
                slots[1] = Value::from(image.owner.as_str());
                slots[2] = Value::BigInt(image.version);
            }
            StatementKind::Insert => {
                slots[0] = Value::BigInt(image.id);
                slots[1] = Value::from(image.owner.as_str());
            }
            StatementKind::Update => slots[0] = Value::from(image.owner.as_str()),
        }
    }

    fn init_id_image(image: &mut IdImage, id: &i64) {
        image.id = *id;
    }

    fn bind_id(slots: &mut [Value], image: &IdImage) {
        slots[0] = Value::BigInt(image.id);
    }

    fn init_image_from_row(image: &mut AccountImage, row: &[Value]) -> Result<()> {
        image.id = i64::try_from(row[0].clone())?;
        image.owner = String::try_from(row[1].clone())?;
        image.version = i64::try_from(row[2].clone())?;
        Ok(())
    }

    fn init_object(image: &AccountImage, _db: &mut Database) -> Result<Self> {
        Ok(Self {
            id: image.id,
            owner: image.owner.clone(),
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

/// A pet whose owner is optional: a missing owner row leaves `owner` unset
/// instead of failing the pet's load.
#[derive(Debug)]
pub struct Pet {
    pub id: i64,
    pub owner_id: Option<i64>,
    pub owner: Option<ObjectRef<Person>>,
}

#[derive(Debug, Default)]
pub struct PetImage {
    id: i64,
    owner: Option<i64>,
}

impl Image for PetImage {}

impl ObjectTraits for Pet {
    type Id = i64;
    type Image = PetImage;
    type IdImage = IdImage;

    const TABLE_NAME: &'static str = "pet";
    const COLUMN_COUNT: usize = 2;
    const ID_COLUMN_COUNT: usize = 1;

    const PERSIST_STATEMENT: &'static str = "INSERT INTO pet (id, owner) VALUES (?1, ?2)";
    const FIND_STATEMENT: &'static str = "SELECT id, owner FROM pet WHERE id = ?1";
    const UPDATE_STATEMENT: &'static str = "UPDATE pet SET owner = ?1 WHERE id = ?2";
    const ERASE_STATEMENT: &'static str = "DELETE FROM pet WHERE id = ?1";

    fn id(&self) -> i64 {
        self.id
    }

    fn init_image(image: &mut PetImage, obj: &Self) {
        image.id = obj.id;
        image.owner = obj.owner_id;
    }

    fn bind_image(slots: &mut [Value], image: &PetImage, kind: StatementKind) {
        match kind {
            StatementKind::Update => slots[0] = Value::from(image.owner),
            StatementKind::Select | StatementKind::Insert => {
                slots[0] = Value::BigInt(image.id);
                slots[1] = Value::from(image.owner);
            }
        }
    }

    fn init_id_image(image: &mut IdImage, id: &i64) {
        image.id = *id;
    }

    fn bind_id(slots: &mut [Value], image: &IdImage) {
        slots[0] = Value::BigInt(image.id);
    }

    fn init_image_from_row(image: &mut PetImage, row: &[Value]) -> Result<()> {
        image.id = i64::try_from(row[0].clone())?;
        image.owner = Option::<i64>::try_from(row[1].clone())?;
        Ok(())
    }

    fn init_object(image: &PetImage, db: &mut Database) -> Result<Self> {
        let owner = image
            .owner
            .and_then(|id| db.find::<Person>(&id).ok().flatten());
        Ok(Self {
            id: image.id,
            owner_id: image.owner,
            owner,
        })
    }
}

/// Layout version reported by every gauge image on this thread.
pub fn set_gauge_layout(layout: usize) {
    GAUGE_LAYOUT.with(|l| l.set(layout));
}

/// A versioned type whose images change layout on demand.
#[derive(Debug)]
pub struct Gauge {
    pub id: i64,
    pub label: String,
    pub version: i64,
}

#[derive(Debug, Default)]
pub struct GaugeImage {
    id: i64,
    label: String,
    version: i64,
}

impl Image for GaugeImage {
    fn version(&self) -> usize {
        GAUGE_LAYOUT.with(Cell::get)
    }
}

#[derive(Debug, Default)]
pub struct GaugeIdImage {
    id: i64,
}

impl Image for GaugeIdImage {
    fn version(&self) -> usize {
        GAUGE_LAYOUT.with(Cell::get)
    }
}

impl ObjectTraits for Gauge {
    type Id = i64;
    type Image = GaugeImage;
    type IdImage = GaugeIdImage;

    const TABLE_NAME: &'static str = "gauge";
    const COLUMN_COUNT: usize = 3;
    const ID_COLUMN_COUNT: usize = 1;
    const MANAGED_OPTIMISTIC_COLUMN_COUNT: usize = 1;

    const PERSIST_STATEMENT: &'static str =
        "INSERT INTO gauge (id, label, version) VALUES (?1, ?2, 1)";
    const FIND_STATEMENT: &'static str = "SELECT id, label, version FROM gauge WHERE id = ?1";
    const UPDATE_STATEMENT: &'static str =
        "UPDATE gauge SET label = ?1, version = version + 1 WHERE id = ?2 AND version = ?3";
    const ERASE_STATEMENT: &'static str = "DELETE FROM gauge WHERE id = ?1";
    const OPTIMISTIC_ERASE_STATEMENT: Option<&'static str> =
        Some("DELETE FROM gauge WHERE id = ?1 AND version = ?2");

    fn id(&self) -> i64 {
        self.id
    }

    fn init_image(image: &mut GaugeImage, obj: &Self) {
        image.id = obj.id;
        image.label.clone_from(&obj.label);
        image.version = obj.version;
    }

    fn bind_image(slots: &mut [Value], image: &GaugeImage, kind: StatementKind) {
        match kind {
            StatementKind::Select => {
                slots[0] = Value::BigInt(image.id);
                slots[1] = Value::from(image.label.as_str());
                slots[2] = Value::BigInt(image.version);
            }
            StatementKind::Insert => {
                slots[0] = Value::BigInt(image.id);
                slots[1] = Value::from(image.label.as_str());
            }
            StatementKind::Update => slots[0] = Value::from(image.label.as_str()),
        }
    }

    fn init_id_image(image: &mut GaugeIdImage, id: &i64) {
        image.id = *id;
    }

    fn bind_id(slots: &mut [Value], image: &GaugeIdImage) {
        slots[0] = Value::BigInt(image.id);
    }

    fn init_image_from_row(image: &mut GaugeImage, row: &[Value]) -> Result<()> {
        image.id = i64::try_from(row[0].clone())?;
        image.label = String::try_from(row[1].clone())?;
        image.version = i64::try_from(row[2].clone())?;
        Ok(())
    }

    fn init_object(image: &GaugeImage, _db: &mut Database) -> Result<Self> {
        Ok(Self {
            id: image.id,
            label: image.label.clone(),
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
