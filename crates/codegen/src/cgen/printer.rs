//! Textual serializer for the C output AST
//!
//! A straightforward structural walk. Labels are dedented one level relative
//! to surrounding statements; every simple statement gets a terminating
//! semicolon; nothing is reformatted.

use super::ast::{
    CBlock, CExpr, CFuncDef, CFuncProto, CParam, CStmt, CType, CVarDecl, TranslationUnit,
};

pub struct Printer {
    out: String,
    level: usize,
}

impl Printer {
    pub fn new() -> Self {
        Printer {
            out: String::new(),
            level: 0,
        }
    }

    /// Serialize a whole translation unit to C source text.
    pub fn print_unit(mut self, tu: &TranslationUnit) -> String {
        for include in &tu.includes {
            if include.is_system {
                self.out.push_str(&format!("#include <{}>\n", include.name));
            } else {
                self.out
                    .push_str(&format!("#include \"{}\"\n", include.name));
            }
        }
        if !tu.includes.is_empty() {
            self.out.push('\n');
        }
        for proto in &tu.fwd_decls {
            let line = self.format_proto(proto);
            self.out.push_str(&line);
            self.out.push_str(";\n");
        }
        if !tu.fwd_decls.is_empty() {
            self.out.push('\n');
        }
        for var in &tu.vars {
            let line = self.format_var_decl(var);
            self.out.push_str(&line);
            self.out.push_str(";\n");
        }
        if !tu.vars.is_empty() {
            self.out.push('\n');
        }
        for func in &tu.funcs {
            self.print_func(func);
            self.out.push('\n');
        }
        self.out
    }

    /// Serialize a single function, mainly for tests.
    pub fn print_func_def(mut self, func: &CFuncDef) -> String {
        self.print_func(func);
        self.out
    }

    fn print_func(&mut self, func: &CFuncDef) {
        let proto = self.format_proto(&func.proto());
        self.out.push_str(&proto);
        self.print_block(&func.body);
        self.out.push('\n');
    }

    fn format_proto(&self, proto: &CFuncProto) -> String {
        let mut s = String::new();
        if proto.is_static {
            s.push_str("static ");
        }
        s.push_str(&self.format_type(&proto.ret));
        s.push(' ');
        s.push_str(&proto.name);
        s.push('(');
        if proto.params.is_empty() {
            s.push_str("void");
        } else {
            let params: Vec<String> = proto
                .params
                .iter()
                .map(|p| self.format_param(p))
                .collect();
            s.push_str(&params.join(", "));
        }
        s.push(')');
        s
    }

    fn format_param(&self, param: &CParam) -> String {
        format!("{} {}", self.format_type(&param.ty), param.name)
    }

    fn format_type(&self, ty: &CType) -> String {
        let mut s = ty.name.clone();
        for _ in 0..ty.pointers {
            s.push('*');
        }
        s
    }

    fn format_var_decl(&self, decl: &CVarDecl) -> String {
        let mut s = String::new();
        if decl.is_static {
            s.push_str("static ");
        }
        s.push_str(&self.format_type(&decl.ty));
        s.push(' ');
        s.push_str(&decl.name);
        if let Some(dim) = decl.array_dim {
            s.push_str(&format!("[{}]", dim));
        }
        if let Some(init) = &decl.init {
            s.push_str(" = ");
            s.push_str(&self.format_expr(init));
        }
        s
    }

    fn print_block(&mut self, block: &CBlock) {
        self.out.push_str(" {\n");
        self.level += 1;
        for decl in &block.decls {
            let line = self.format_var_decl(decl);
            self.indent();
            self.out.push_str(&line);
            self.out.push_str(";\n");
        }
        for stmt in &block.stmts {
            self.print_stmt(stmt);
        }
        self.level -= 1;
        self.indent();
        self.out.push('}');
    }

    fn print_stmt(&mut self, stmt: &CStmt) {
        match stmt {
            CStmt::Expr(expr) => {
                self.indent();
                let line = self.format_expr(expr);
                self.out.push_str(&line);
                self.out.push_str(";\n");
            }
            CStmt::If {
                cond,
                then_block,
                else_block,
            } => {
                self.indent();
                let cond_s = self.format_expr(cond);
                self.out.push_str(&format!("if ({})", cond_s));
                self.print_block(then_block);
                if let Some(else_block) = else_block {
                    self.out.push_str(" else");
                    self.print_block(else_block);
                }
                self.out.push('\n');
            }
            CStmt::DoWhile { body, cond } => {
                self.indent();
                self.out.push_str("do");
                self.print_block(body);
                let cond_s = self.format_expr(cond);
                self.out.push_str(&format!(" while ({});\n", cond_s));
            }
            CStmt::Switch {
                cond,
                cases,
                default,
            } => {
                self.indent();
                let cond_s = self.format_expr(cond);
                self.out.push_str(&format!("switch ({}) {{\n", cond_s));
                self.level += 1;
                for (value, stmts) in cases {
                    self.indent();
                    self.out.push_str(&format!("case {}:\n", value));
                    self.level += 1;
                    for s in stmts {
                        self.print_stmt(s);
                    }
                    self.level -= 1;
                }
                if let Some(stmts) = default {
                    self.indent();
                    self.out.push_str("default:\n");
                    self.level += 1;
                    for s in stmts {
                        self.print_stmt(s);
                    }
                    self.level -= 1;
                }
                self.level -= 1;
                self.indent();
                self.out.push_str("}\n");
            }
            CStmt::Label(name) => {
                // labels sit one level left of the statements around them
                let dedent = self.level.saturating_sub(1);
                self.out.push_str(&"\t".repeat(dedent));
                self.out.push_str(&format!("{}:;\n", name));
            }
            CStmt::Goto(name) => {
                self.indent();
                self.out.push_str(&format!("goto {};\n", name));
            }
            CStmt::Break => {
                self.indent();
                self.out.push_str("break;\n");
            }
            CStmt::Continue => {
                self.indent();
                self.out.push_str("continue;\n");
            }
            CStmt::Return(expr) => {
                self.indent();
                match expr {
                    Some(expr) => {
                        let s = self.format_expr(expr);
                        self.out.push_str(&format!("return {};\n", s));
                    }
                    None => self.out.push_str("return;\n"),
                }
            }
            CStmt::Block(block) => {
                self.indent();
                self.print_block(block);
                self.out.push('\n');
            }
            CStmt::Comment(text) => {
                self.indent();
                self.out.push_str(&format!("/* {} */\n", text));
            }
        }
    }

    fn format_expr(&self, expr: &CExpr) -> String {
        match expr {
            CExpr::Id(name) => name.clone(),
            CExpr::IntConst(v) => v.to_string(),
            CExpr::DoubleConst(v) => {
                let s = v.to_string();
                // keep a decimal point so the literal stays a double
                if s.contains('.') || s.contains('e') || s.contains("inf") || s.contains("NaN") {
                    s
                } else {
                    format!("{}.0", s)
                }
            }
            CExpr::StrConst(v) => format!("\"{}\"", escape_c_string(v)),
            CExpr::Unary { op, operand } => {
                format!("{}{}", op, self.format_operand(operand))
            }
            CExpr::Binary { op, left, right } => {
                format!(
                    "{} {} {}",
                    self.format_operand(left),
                    op,
                    self.format_operand(right)
                )
            }
            CExpr::Assign { lhs, rhs } => {
                format!("{} = {}", self.format_expr(lhs), self.format_expr(rhs))
            }
            CExpr::Call { func, args } => {
                let args: Vec<String> = args.iter().map(|a| self.format_expr(a)).collect();
                format!("{}({})", func, args.join(", "))
            }
            CExpr::Index { base, index } => {
                format!(
                    "{}[{}]",
                    self.format_operand(base),
                    self.format_expr(index)
                )
            }
            CExpr::Arrow { base, field } => {
                format!("{}->{}", self.format_operand(base), field)
            }
            CExpr::Cast { ty, operand } => {
                format!("({}){}", self.format_type(ty), self.format_operand(operand))
            }
            CExpr::AddrOf(operand) => format!("&{}", self.format_operand(operand)),
            CExpr::Deref(operand) => format!("*{}", self.format_operand(operand)),
        }
    }

    /// Parenthesize compound operands so precedence never bites.
    fn format_operand(&self, expr: &CExpr) -> String {
        match expr {
            CExpr::Id(_) | CExpr::IntConst(_) | CExpr::Call { .. } | CExpr::Index { .. } => {
                self.format_expr(expr)
            }
            _ => format!("({})", self.format_expr(expr)),
        }
    }

    fn indent(&mut self) {
        self.out.push_str(&"\t".repeat(self.level));
    }
}

impl Default for Printer {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgen::ast::CVarDecl;

    #[test]
    fn test_print_simple_function() {
        let mut func = CFuncDef::new("demo", CType::obj(), vec![CParam::obj("self")]);
        func.body.add_decl(CVarDecl::obj("t0"));
        func.body.add_expr(CExpr::assign_id(
            "t0",
            CExpr::call("NrNum_Add", vec![CExpr::id("a"), CExpr::id("b")]),
        ));
        func.body.add(CStmt::Return(Some(CExpr::id("t0"))));

        let text = Printer::new().print_func_def(&func);
        assert!(text.contains("static NrObject* demo(NrObject* self) {"));
        assert!(text.contains("NrObject* t0 = NULL;"));
        assert!(text.contains("t0 = NrNum_Add(a, b);"));
        assert!(text.contains("return t0;"));
    }

    #[test]
    fn test_label_dedented() {
        let mut func = CFuncDef::new("f", CType::void(), vec![]);
        func.body.add(CStmt::Label("end".to_string()));
        func.body.add(CStmt::Return(None));
        let text = Printer::new().print_func_def(&func);
        assert!(text.contains("end:;"));
        assert!(text.contains("\treturn;"));
    }

    #[test]
    fn test_string_escaping() {
        let printer = Printer::new();
        let s = printer.format_expr(&CExpr::StrConst("a\"b\nc".to_string()));
        assert_eq!(s, "\"a\\\"b\\nc\"");
    }

    #[test]
    fn test_includes_and_order() {
        let mut tu = TranslationUnit::new();
        tu.add_include("stdlib.h", true);
        tu.add_include("nr_object.h", false);
        tu.add_var(CVarDecl::obj("mod_obj").with_static());
        let text = Printer::new().print_unit(&tu);
        let includes_pos = text.find("#include <stdlib.h>").unwrap();
        let local_pos = text.find("#include \"nr_object.h\"").unwrap();
        let var_pos = text.find("static NrObject* mod_obj = NULL;").unwrap();
        assert!(includes_pos < local_pos);
        assert!(local_pos < var_pos);
    }
}
