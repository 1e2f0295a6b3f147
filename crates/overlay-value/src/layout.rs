//! Field placement for native classes.
//!
//! Placement follows the native compiler: fields are laid out in declaration
//! order after the base class, each auto-placed field aligned to its own type,
//! and the total rounded to the widest alignment seen. Explicit offsets are
//! absolute from the start of the object and are taken verbatim.
use crate::error::LayoutError;
use overlay_types::{ClassTag, TypeDescriptor, TypeRegistry};
use overlay_utils::{align_up, is_valid_alignment, validate_alignment, ByteOffset, NativeAddress};
use std::{
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    sync::Arc,
};
use tracing::{debug, warn};

/// Runs against an owned object's address right before its block is freed.
pub type DestructorHook = Arc<dyn Fn(NativeAddress) + Send + Sync>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FieldPlacement {
    Auto,
    Explicit(ByteOffset),
}

#[derive(Clone, Debug)]
pub struct FieldDeclaration {
    pub name: String,
    pub ty: TypeDescriptor,
    pub placement: FieldPlacement,
    /// For ghost fields, the already-placed field whose storage is reused.
    pub ghost_of: Option<String>,
}

impl FieldDeclaration {
    pub fn auto(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
            placement: FieldPlacement::Auto,
            ghost_of: None,
        }
    }

    pub fn at(name: impl Into<String>, ty: TypeDescriptor, offset: usize) -> Self {
        Self {
            placement: FieldPlacement::Explicit(ByteOffset(offset)),
            ..Self::auto(name, ty)
        }
    }

    /// Reinterprets the storage of `target` as `ty` under `name`.
    pub fn ghost(name: impl Into<String>, ty: TypeDescriptor, target: impl Into<String>) -> Self {
        Self {
            ghost_of: Some(target.into()),
            ..Self::auto(name, ty)
        }
    }

    pub fn is_ghost(&self) -> bool {
        self.ghost_of.is_some()
    }
}

/// Everything needed to compile one class.
#[derive(Clone)]
pub struct ClassDeclaration {
    pub name: String,
    pub base: Option<Arc<ClassLayout>>,
    pub fields: Vec<FieldDeclaration>,
    pub size: Option<usize>,
    pub alignment: Option<usize>,
    pub destructor: Option<DestructorHook>,
}

impl ClassDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: None,
            fields: vec![],
            size: None,
            alignment: None,
            destructor: None,
        }
    }

    pub fn extends(mut self, base: &Arc<ClassLayout>) -> Self {
        self.base = Some(base.clone());
        self
    }

    pub fn field(mut self, field: FieldDeclaration) -> Self {
        self.fields.push(field);
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn alignment(mut self, alignment: usize) -> Self {
        self.alignment = Some(alignment);
        self
    }

    pub fn destructor(mut self, hook: impl Fn(NativeAddress) + Send + Sync + 'static) -> Self {
        self.destructor = Some(Arc::new(hook));
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldLayout {
    pub name: String,
    pub ty: TypeDescriptor,
    pub offset: ByteOffset,
    pub ghost: bool,
    /// Class that declared the field.
    pub owner: Arc<str>,
}

impl FieldLayout {
    /// Bytes occupied by the field; ghosts occupy none of their own.
    pub fn end(&self) -> usize {
        self.offset.as_usize() + self.ty.size().unwrap_or(0)
    }
}

/// Compiled, immutable layout of one class.
pub struct ClassLayout {
    tag: ClassTag,
    ty: TypeDescriptor,
    base: Option<Arc<ClassLayout>>,
    fields: Vec<FieldLayout>,
    by_name: HashMap<String, usize>,
    size: usize,
    alignment: usize,
    open: bool,
    destructor: Option<DestructorHook>,
}

impl Debug for ClassLayout {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassLayout")
            .field("class", &self.tag)
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .field("open", &self.open)
            .field("fields", &self.fields)
            .finish()
    }
}

impl ClassLayout {
    pub fn name(&self) -> &str {
        &self.tag.name
    }

    pub fn tag(&self) -> &ClassTag {
        &self.tag
    }

    /// The class as a by-value type, for embedding and parameter lists.
    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    pub fn base(&self) -> Option<&Arc<ClassLayout>> {
        self.base.as_ref()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// True when no size was declared: the class can be extended and aliased
    /// but not allocated.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Every field, inherited ones first, in placement order.
    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }

    /// Looks up a field by name; a subclass field shadows an inherited one.
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    pub fn require_field(&self, name: &str) -> Result<&FieldLayout, LayoutError> {
        self.field(name).ok_or_else(|| LayoutError::UnknownField {
            class: self.name().to_string(),
            field: name.to_string(),
        })
    }

    /// Nearest destructor hook on this class or its bases.
    pub fn destructor(&self) -> Option<&DestructorHook> {
        self.destructor
            .as_ref()
            .or_else(|| self.base.as_ref().and_then(|b| b.destructor()))
    }

    pub fn is_subclass_of(&self, other: &ClassLayout) -> bool {
        self.tag.is_a(other.tag.id)
    }
}

/// Turns [`ClassDeclaration`]s into [`ClassLayout`]s, publishing each compiled
/// class in the registry so later declarations can refer to it by name.
pub struct LayoutCompiler<'r> {
    registry: &'r TypeRegistry,
}

impl<'r> LayoutCompiler<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self { registry }
    }

    pub fn compile(&self, decl: ClassDeclaration) -> Result<Arc<ClassLayout>, LayoutError> {
        let class = decl.name.as_str();
        let owner: Arc<str> = class.into();

        if let Some(align) = decl.alignment {
            if !is_valid_alignment(align) {
                return Err(LayoutError::InvalidAlignment {
                    class: class.to_string(),
                    alignment: align,
                });
            }
        }

        let (mut fields, mut by_name, base_size, base_align) = match &decl.base {
            Some(base) => (
                base.fields.clone(),
                base.by_name.clone(),
                base.size,
                base.alignment,
            ),
            None => (vec![], HashMap::new(), 0, 1),
        };

        let mut cursor = base_size;
        let mut max_alignment = base_align.max(decl.alignment.unwrap_or(1));

        for field in &decl.fields {
            let size = match field.ty.size() {
                Some(size) if !field.ty.is_void() => size,
                _ => {
                    return Err(LayoutError::UnsizedField {
                        class: class.to_string(),
                        field: field.name.clone(),
                        ty: field.ty.name().to_string(),
                    })
                }
            };

            let (offset, ghost) = match &field.ghost_of {
                Some(target) => {
                    let placed = by_name.get(target.as_str()).ok_or_else(|| {
                        LayoutError::UnknownGhostTarget {
                            class: class.to_string(),
                            field: field.name.clone(),
                            target: target.clone(),
                        }
                    })?;
                    (fields[*placed].offset, true)
                }
                None => {
                    let align = field.ty.alignment();
                    max_alignment = max_alignment.max(align);
                    let offset = match field.placement {
                        FieldPlacement::Explicit(offset) => {
                            if !validate_alignment(offset.as_usize(), align) {
                                warn!(
                                    class,
                                    field = %field.name,
                                    %offset,
                                    align,
                                    "explicit field offset is not naturally aligned"
                                );
                            }
                            cursor = cursor.max(offset.as_usize() + size);
                            offset
                        }
                        FieldPlacement::Auto => {
                            let offset = align_up(cursor, align);
                            cursor = offset + size;
                            ByteOffset(offset)
                        }
                    };
                    (offset, false)
                }
            };

            by_name.insert(field.name.clone(), fields.len());
            fields.push(FieldLayout {
                name: field.name.clone(),
                ty: field.ty.clone(),
                offset,
                ghost,
                owner: owner.clone(),
            });
        }

        let computed = align_up(cursor, max_alignment);
        let size = match decl.size {
            Some(declared) if declared < computed => {
                return Err(LayoutError::DeclaredSizeTooSmall {
                    class: class.to_string(),
                    declared,
                    computed,
                })
            }
            Some(declared) => declared,
            None => computed,
        };

        let tag = self
            .registry
            .allocate_class(class, decl.base.as_ref().map(|b| &b.tag))?;
        let ty = self.registry.define_class(tag.clone(), size, max_alignment)?;

        debug!(
            class,
            size,
            alignment = max_alignment,
            fields = fields.len(),
            open = decl.size.is_none(),
            "compiled class layout"
        );

        Ok(Arc::new(ClassLayout {
            tag,
            ty,
            base: decl.base,
            fields,
            by_name,
            size,
            alignment: max_alignment,
            open: decl.size.is_none(),
            destructor: decl.destructor,
        }))
    }
}
